//! Retriever - 유사도 top-k + 이웃 확장 + 토큰 예산
//!
//! 1. 쿼리 임베딩
//! 2. 문서의 모든 청크 점수 계산, 상위 top_k 선택 (동점은 낮은 chunk_id 우선)
//! 3. 선택된 청크마다 이웃 윈도우를 합집합으로 추가
//! 4. keep priority 순으로 토큰 예산 안에서 채택
//! 5. chunk_id 오름차순으로 반환 (문서 순서 유지)
//!
//! keep priority: top_k 청크가 먼저(유사도 순위 순), 그다음 이웃 청크(각자의 유사도 순위 순).
//! 예산을 처음 넘는 청크에서 멈추므로 낮은 순위부터 잘려 나갑니다.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};

use super::store::{DocumentStatus, DocumentStatusLookup};
use super::vector::SharedVectorStore;

// ============================================================================
// Types
// ============================================================================

/// 검색 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub neighbor_window: usize,
    pub token_budget: usize,
}

impl From<&RagConfig> for RetrievalParams {
    fn from(config: &RagConfig) -> Self {
        Self {
            top_k: config.top_k,
            neighbor_window: config.neighbor_window,
            token_budget: config.token_budget,
        }
    }
}

/// 검색된 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: usize,
    pub text: String,
    pub token_count: usize,
    /// 쿼리와의 코사인 유사도
    pub similarity: f32,
    /// top_k 안에서의 순위 (0부터). 이웃으로 들어온 청크는 None
    pub rank: Option<usize>,
}

/// 검색 결과 (chunk_id 오름차순)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub document_id: i64,
    pub chunks: Vec<RetrievedChunk>,
    /// chunks 의 토큰 합계 (≤ token_budget)
    pub total_tokens: usize,
    /// 예산 초과로 제외된 후보 chunk_id
    pub dropped: Vec<usize>,
}

impl RetrievalResult {
    /// 근거 없음
    pub fn empty(document_id: i64) -> Self {
        Self {
            document_id,
            chunks: Vec::new(),
            total_tokens: 0,
            dropped: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.chunk_id).collect()
    }
}

/// 순수 검색 계획 (어떤 청크를 어떤 순서로 채택할지)
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    /// 채택된 chunk_id (오름차순)
    pub selected: Vec<usize>,
    /// 예산 초과로 제외된 chunk_id (오름차순)
    pub dropped: Vec<usize>,
    /// top_k 순위
    pub ranks: HashMap<usize, usize>,
    pub total_tokens: usize,
}

// ============================================================================
// Planning
// ============================================================================

/// 점수표로부터 검색 계획 수립
///
/// # Arguments
/// * `scores` - chunk_id → 유사도
/// * `params` - top_k / 이웃 윈도우 / 토큰 예산
/// * `token_count` - chunk_id → 토큰 수
/// * `neighbors` - chunk_id → 이웃 chunk_id 집합
pub fn plan_retrieval<T, N>(
    scores: &BTreeMap<usize, f32>,
    params: &RetrievalParams,
    token_count: T,
    neighbors: N,
) -> RetrievalPlan
where
    T: Fn(usize) -> usize,
    N: Fn(usize) -> BTreeSet<usize>,
{
    // 1. 유사도 내림차순, 동점은 낮은 chunk_id
    let mut ranked: Vec<(usize, f32)> = scores.iter().map(|(&id, &s)| (id, s)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let similarity_rank: HashMap<usize, usize> = ranked
        .iter()
        .enumerate()
        .map(|(rank, &(id, _))| (id, rank))
        .collect();

    // 2. top_k
    let hits: Vec<usize> = ranked.iter().take(params.top_k).map(|&(id, _)| id).collect();
    let ranks: HashMap<usize, usize> = hits.iter().enumerate().map(|(r, &id)| (id, r)).collect();

    // 3. 이웃 합집합 (top_k 제외, 유사도 순위 순)
    let mut extra: Vec<usize> = hits
        .iter()
        .flat_map(|&id| neighbors(id))
        .filter(|id| !ranks.contains_key(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    extra.sort_by_key(|id| similarity_rank.get(id).copied().unwrap_or(usize::MAX));

    // 4. keep priority 순 채택, 첫 초과에서 중단
    let mut selected = BTreeSet::new();
    let mut dropped = BTreeSet::new();
    let mut total_tokens = 0;
    let mut exhausted = false;

    for id in hits.iter().chain(extra.iter()).copied() {
        let tokens = token_count(id);
        if exhausted || total_tokens + tokens > params.token_budget {
            exhausted = true;
            dropped.insert(id);
            continue;
        }
        total_tokens += tokens;
        selected.insert(id);
    }

    RetrievalPlan {
        selected: selected.into_iter().collect(),
        dropped: dropped.into_iter().collect(),
        ranks,
        total_tokens,
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// 문서 단위 검색기
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    vectors: SharedVectorStore,
    status: Arc<dyn DocumentStatusLookup>,
}

impl Retriever {
    pub fn new(
        embedder: Embedder,
        vectors: SharedVectorStore,
        status: Arc<dyn DocumentStatusLookup>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            status,
        }
    }

    /// 쿼리에 대한 청크 검색
    ///
    /// 문서가 completed 가 아니면 `DocumentNotReady`.
    /// 청크가 하나도 없으면 빈 결과 (에러 아님).
    pub async fn retrieve(
        &self,
        query: &str,
        document_id: i64,
        params: &RetrievalParams,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        match self.status.document_status(document_id)? {
            None => return Err(RagError::DocumentNotFound(document_id)),
            Some(DocumentStatus::Completed) => {}
            Some(status) => {
                return Err(RagError::DocumentNotReady {
                    document_id,
                    status,
                })
            }
        }

        let chunk_count = {
            let vectors = self.vectors.read().map_err(|_| RagError::LockPoisoned)?;
            vectors.chunk_count(document_id)
        };
        if chunk_count == 0 || params.top_k == 0 {
            tracing::info!("Document {} has no chunks to retrieve from", document_id);
            return Ok(RetrievalResult::empty(document_id));
        }

        // 임베딩 호출 중에는 락을 잡지 않음
        let query_vector = self.embedder.embed_one(query).await?;

        let vectors = self.vectors.read().map_err(|_| RagError::LockPoisoned)?;
        let scores = vectors.score(&query_vector, document_id)?;

        let plan = plan_retrieval(
            &scores,
            params,
            |id| vectors.get(document_id, id).map_or(0, |r| r.token_count),
            |id| vectors.get_neighbors(document_id, id, params.neighbor_window),
        );

        let chunks: Vec<RetrievedChunk> = plan
            .selected
            .iter()
            .filter_map(|&id| {
                let record = vectors.get(document_id, id)?;
                Some(RetrievedChunk {
                    chunk_id: id,
                    text: record.text.clone(),
                    token_count: record.token_count,
                    similarity: scores.get(&id).copied().unwrap_or(0.0),
                    rank: plan.ranks.get(&id).copied(),
                })
            })
            .collect();

        if !plan.dropped.is_empty() {
            tracing::debug!(
                "Token budget {} dropped chunks {:?} for document {}",
                params.token_budget,
                plan.dropped,
                document_id
            );
        }
        tracing::info!(
            "Retrieved {} chunks ({} tokens) from document {}",
            chunks.len(),
            plan.total_tokens,
            document_id
        );

        Ok(RetrievalResult {
            document_id,
            chunks,
            total_tokens: plan.total_tokens,
            dropped: plan.dropped,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
