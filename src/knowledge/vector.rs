//! Vector Store - 인메모리 청크 벡터 테이블
//!
//! 문서별로 (chunk_id → 텍스트, 벡터, 토큰 수) 테이블을 유지하고
//! 선형 스캔 코사인 유사도로 점수를 계산합니다.
//! 문서당 수백 청크 규모를 가정합니다. 더 큰 규모는 같은 트레이트 뒤에
//! 인덱스 기반 구현을 두면 Retriever 변경 없이 교체할 수 있습니다.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

// ============================================================================
// Types
// ============================================================================

/// 임베딩이 포함된 청크 행
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// 문서 ID (documents.id)
    pub document_id: i64,
    /// 청크 인덱스 (0-based)
    pub chunk_id: usize,
    pub text: String,
    pub token_count: usize,
    /// 첫/마지막 문장 인덱스
    pub start_sentence: usize,
    pub end_sentence: usize,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// 벡터 저장소 공통 인터페이스
///
/// (document_id, chunk_id) 키의 append-only 테이블입니다.
pub trait VectorStore: Send + Sync {
    /// 임베딩된 청크 1개 삽입
    ///
    /// 이미 존재하는 키면 `DuplicateChunk`, 순번이 비면 `ChunkOutOfOrder`.
    fn add(&mut self, record: ChunkRecord) -> Result<()>;

    /// 문서의 모든 청크와 쿼리 벡터의 코사인 유사도 (chunk_id → 점수)
    fn score(&self, query_vector: &[f32], document_id: i64) -> Result<BTreeMap<usize, f32>>;

    /// chunk_id 주변 window 이내의 유효한 이웃 id (자기 자신 제외)
    fn get_neighbors(&self, document_id: i64, chunk_id: usize, window: usize) -> BTreeSet<usize>;

    /// 청크 조회
    fn get(&self, document_id: i64, chunk_id: usize) -> Option<&ChunkRecord>;

    /// 문서의 청크 수
    fn chunk_count(&self, document_id: i64) -> usize;

    /// 문서 테이블 존재 여부
    fn contains_document(&self, document_id: i64) -> bool;

    /// 문서의 모든 청크 삭제, 삭제된 청크 수 반환
    fn remove_document(&mut self, document_id: i64) -> usize;

    /// 문서 테이블 전체를 검증 후 한 번에 교체
    ///
    /// 검증에 실패하면 기존 테이블은 그대로 남습니다.
    fn replace_document(&mut self, document_id: i64, records: Vec<ChunkRecord>) -> Result<()>;
}

/// 검색/수집이 공유하는 벡터 저장소 핸들
pub type SharedVectorStore = Arc<RwLock<dyn VectorStore>>;

// ============================================================================
// InMemoryVectorStore
// ============================================================================

/// 인메모리 벡터 저장소
///
/// 문서별 `Vec<ChunkRecord>`의 인덱스가 곧 chunk_id입니다.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    documents: HashMap<i64, Vec<ChunkRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 공유 핸들로 감싸기
    pub fn shared() -> SharedVectorStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// 저장된 전체 청크 수
    pub fn len(&self) -> usize {
        self.documents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VectorStore for InMemoryVectorStore {
    fn add(&mut self, record: ChunkRecord) -> Result<()> {
        let rows = self.documents.entry(record.document_id).or_default();

        if record.chunk_id < rows.len() {
            return Err(RagError::DuplicateChunk {
                document_id: record.document_id,
                chunk_id: record.chunk_id,
            });
        }
        if record.chunk_id > rows.len() {
            return Err(RagError::ChunkOutOfOrder {
                document_id: record.document_id,
                expected: rows.len(),
                got: record.chunk_id,
            });
        }
        if let Some(first) = rows.first() {
            if first.embedding.len() != record.embedding.len() {
                return Err(RagError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: record.embedding.len(),
                });
            }
        }

        rows.push(record);
        Ok(())
    }

    fn score(&self, query_vector: &[f32], document_id: i64) -> Result<BTreeMap<usize, f32>> {
        let Some(rows) = self.documents.get(&document_id) else {
            return Ok(BTreeMap::new());
        };

        if let Some(first) = rows.first() {
            if first.embedding.len() != query_vector.len() {
                return Err(RagError::DimensionMismatch {
                    expected: first.embedding.len(),
                    actual: query_vector.len(),
                });
            }
        }

        Ok(rows
            .iter()
            .map(|r| (r.chunk_id, cosine_similarity(query_vector, &r.embedding)))
            .collect())
    }

    fn get_neighbors(&self, document_id: i64, chunk_id: usize, window: usize) -> BTreeSet<usize> {
        let count = self.chunk_count(document_id);
        if chunk_id >= count {
            return BTreeSet::new();
        }

        let lo = chunk_id.saturating_sub(window);
        let hi = chunk_id.saturating_add(window).min(count - 1);
        (lo..=hi).filter(|&id| id != chunk_id).collect()
    }

    fn get(&self, document_id: i64, chunk_id: usize) -> Option<&ChunkRecord> {
        self.documents.get(&document_id)?.get(chunk_id)
    }

    fn chunk_count(&self, document_id: i64) -> usize {
        self.documents.get(&document_id).map_or(0, Vec::len)
    }

    fn contains_document(&self, document_id: i64) -> bool {
        self.documents.contains_key(&document_id)
    }

    fn remove_document(&mut self, document_id: i64) -> usize {
        self.documents.remove(&document_id).map_or(0, |rows| rows.len())
    }

    fn replace_document(&mut self, document_id: i64, records: Vec<ChunkRecord>) -> Result<()> {
        let mut staged = InMemoryVectorStore::new();
        for record in records {
            if record.document_id != document_id {
                return Err(RagError::Configuration(format!(
                    "record for document {} staged under document {}",
                    record.document_id, document_id
                )));
            }
            staged.add(record)?;
        }

        let rows = staged.documents.remove(&document_id).unwrap_or_default();
        self.documents.insert(document_id, rows);
        Ok(())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(document_id: i64, chunk_id: usize, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            document_id,
            chunk_id,
            text: format!("chunk {}", chunk_id),
            token_count: 2,
            start_sentence: chunk_id,
            end_sentence: chunk_id,
            embedding,
        }
    }

    fn store_with(document_id: i64, n: usize) -> InMemoryVectorStore {
        let mut store = InMemoryVectorStore::new();
        for i in 0..n {
            store.add(record(document_id, i, vec![1.0, i as f32])).unwrap();
        }
        store
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![10.0, 20.0, 30.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[test]
    fn test_add_duplicate_chunk() {
        let mut store = store_with(1, 3);
        let err = store.add(record(1, 1, vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            RagError::DuplicateChunk {
                document_id: 1,
                chunk_id: 1
            }
        ));
    }

    #[test]
    fn test_add_out_of_order_chunk() {
        let mut store = store_with(1, 2);
        assert!(matches!(
            store.add(record(1, 5, vec![1.0, 0.0])),
            Err(RagError::ChunkOutOfOrder {
                expected: 2,
                got: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_add_dimension_mismatch() {
        let mut store = store_with(1, 1);
        assert!(matches!(
            store.add(record(1, 1, vec![1.0, 0.0, 0.0])),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_neighbors_window_one() {
        let store = store_with(7, 10);
        assert_eq!(store.get_neighbors(7, 4, 1), BTreeSet::from([3, 5]));
        assert_eq!(store.get_neighbors(7, 0, 1), BTreeSet::from([1]));
        assert_eq!(store.get_neighbors(7, 9, 1), BTreeSet::from([8]));
    }

    #[test]
    fn test_neighbors_wider_window_and_bounds() {
        let store = store_with(7, 5);
        assert_eq!(store.get_neighbors(7, 1, 2), BTreeSet::from([0, 2, 3]));
        assert!(store.get_neighbors(7, 2, 0).is_empty());
        assert!(store.get_neighbors(7, 99, 1).is_empty());
        assert!(store.get_neighbors(8, 0, 1).is_empty());
    }

    #[test]
    fn test_single_chunk_has_no_neighbors() {
        let store = store_with(1, 1);
        assert!(store.get_neighbors(1, 0, 3).is_empty());
    }

    #[test]
    fn test_score_is_per_document() {
        let mut store = store_with(1, 3);
        store.add(record(2, 0, vec![0.0, 1.0])).unwrap();

        let scores = store.score(&[1.0, 0.0], 1).unwrap();
        assert_eq!(scores.len(), 3);
        assert!((scores[&0] - 1.0).abs() < 0.0001);

        let scores = store.score(&[1.0, 0.0], 2).unwrap();
        assert_eq!(scores.len(), 1);
        assert!(scores[&0].abs() < 0.0001);

        assert!(store.score(&[1.0, 0.0], 99).unwrap().is_empty());
    }

    #[test]
    fn test_score_dimension_mismatch() {
        let store = store_with(1, 2);
        assert!(matches!(
            store.score(&[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_replace_document_is_atomic() {
        let mut store = store_with(1, 2);
        let bad = vec![record(1, 0, vec![1.0, 0.0]), record(1, 0, vec![1.0, 0.0])];
        assert!(store.replace_document(1, bad).is_err());
        assert_eq!(store.chunk_count(1), 2);

        let good = (0..4).map(|i| record(1, i, vec![0.5, 0.5])).collect();
        store.replace_document(1, good).unwrap();
        assert_eq!(store.chunk_count(1), 4);
    }

    #[test]
    fn test_remove_document() {
        let mut store = store_with(1, 3);
        assert_eq!(store.remove_document(1), 3);
        assert!(!store.contains_document(1));
        assert!(store.is_empty());
    }
}
