//! 답변 생성 모듈 - 세 가지 모드
//!
//! | 모드 | 컨텍스트 | 인용 |
//! |------|----------|------|
//! | `rag` | 검색된 청크만 | 모든 사실에 `[Chunk N]` |
//! | `non_rag` | 없음 | 없음 |
//! | `hybrid` | 검색된 청크 + 일반 지식 | 문서 출처 문장에만 |
//!
//! 외부 호출 실패는 모드와 원인을 담은 `RagError::Generation`으로 반환하며
//! 다른 모드로 대체하지 않습니다.

mod gemini;
mod prompt;

pub use gemini::{GeminiCompletion, DEFAULT_CHAT_MODEL};
pub use prompt::{INSUFFICIENT_CONTEXT_ANSWER, SUMMARY_QUERY};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{ModeTemperatures, RagConfig, SummaryConfig};
use crate::error::{ProviderError, RagError, Result};
use crate::knowledge::{count_tokens, RetrievalResult, RetrievedChunk};
use crate::retry::RetryPolicy;

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[chunks?\s*(\d+(?:\s*(?:,|and|&)\s*\d+)*)\]").expect("Invalid citation regex")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("Invalid number regex"));

/// 인용 제거 후 남는 구두점/공백 앞의 공백
static LOOSE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+([ \t.,;:!?])").expect("Invalid space regex"));

// ============================================================================
// AnswerMode
// ============================================================================

/// 답변 생성 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Rag,
    NonRag,
    Hybrid,
}

impl AnswerMode {
    pub const ALL: [AnswerMode; 3] = [AnswerMode::Rag, AnswerMode::NonRag, AnswerMode::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::NonRag => "non_rag",
            Self::Hybrid => "hybrid",
        }
    }

    /// 검색 컨텍스트를 사용하는 모드인지
    pub fn uses_context(&self) -> bool {
        !matches!(self, Self::NonRag)
    }
}

impl fmt::Display for AnswerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rag" => Ok(Self::Rag),
            "non_rag" | "nonrag" => Ok(Self::NonRag),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(RagError::Configuration(format!(
                "unknown answer mode: {} (expected rag, non_rag or hybrid)",
                other
            ))),
        }
    }
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 완성 요청
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// 완성 응답 (토큰 수는 프로바이더가 보고한 경우에만)
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
}

/// LLM 완성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 완성 1회 호출 (재시도 없음)
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// 모델 이름
    fn model(&self) -> &str;
}

// ============================================================================
// Records
// ============================================================================

/// 모드별 답변 기록 (저장하지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    pub mode: AnswerMode,
    pub answer: String,
    /// 답변이 인용한 청크 id (오름차순, 제공된 컨텍스트에 있는 것만)
    pub citations: Vec<usize>,
    pub elapsed: Duration,
    /// 전송한 프롬프트의 로컬 토큰 수
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub chunks_used: usize,
    /// 제공한 청크들의 토큰 합계
    pub context_tokens: usize,
    pub model: String,
}

/// 한 쿼리에 대한 세 모드 비교 결과
#[derive(Debug)]
pub struct ComparisonResult {
    pub rag: Result<AnswerRecord>,
    pub non_rag: Result<AnswerRecord>,
    pub hybrid: Result<AnswerRecord>,
}

impl ComparisonResult {
    /// 모드 순서대로 결과
    pub fn iter(&self) -> impl Iterator<Item = (AnswerMode, &Result<AnswerRecord>)> {
        [
            (AnswerMode::Rag, &self.rag),
            (AnswerMode::NonRag, &self.non_rag),
            (AnswerMode::Hybrid, &self.hybrid),
        ]
        .into_iter()
    }
}

/// 문서 요약
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub summary: String,
    pub citations: Vec<usize>,
    pub chunks_used: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub elapsed: Duration,
}

// ============================================================================
// Generator
// ============================================================================

/// 모드별 답변 생성기
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn CompletionProvider>,
    temperatures: ModeTemperatures,
    max_completion_tokens: u32,
    summary: SummaryConfig,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Generator {
    pub fn from_config(provider: Arc<dyn CompletionProvider>, config: &RagConfig) -> Self {
        Self {
            provider,
            temperatures: config.temperatures.clone(),
            max_completion_tokens: config.max_completion_tokens,
            summary: config.summary.clone(),
            retry: config.retry.clone(),
            timeout: config.request_timeout(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// 한 모드로 답변 생성
    ///
    /// rag/hybrid 에서 컨텍스트가 비어 있으면 LLM을 호출하지 않고
    /// 근거 부족 답변을 반환합니다.
    pub async fn generate(
        &self,
        query: &str,
        mode: AnswerMode,
        context: &RetrievalResult,
    ) -> Result<AnswerRecord> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let start = Instant::now();
        let chunks: &[RetrievedChunk] = if mode.uses_context() {
            context.chunks.as_slice()
        } else {
            &[]
        };

        if mode.uses_context() && chunks.is_empty() {
            tracing::info!("No context for {} answer, returning insufficient-context reply", mode);
            return Ok(AnswerRecord {
                mode,
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                elapsed: start.elapsed(),
                prompt_tokens: 0,
                completion_tokens: 0,
                chunks_used: 0,
                context_tokens: 0,
                model: self.provider.model().to_string(),
            });
        }

        let request = CompletionRequest {
            system: prompt::system_prompt(mode).to_string(),
            user: prompt::user_prompt(mode, query, chunks),
            temperature: self.temperatures.for_mode(mode),
            max_output_tokens: self.max_completion_tokens,
        };
        let prompt_tokens = count_tokens(&request.system) + count_tokens(&request.user);

        let provider = &self.provider;
        let label = format!("{} generation", mode);
        let completion = self
            .retry
            .run(&label, self.timeout, |_| provider.complete(&request))
            .await
            .map_err(|source| RagError::Generation { mode, source })?;

        let completion_tokens = completion
            .completion_tokens
            .unwrap_or_else(|| count_tokens(&completion.text));

        let mut answer = completion.text;
        let citations = if mode.uses_context() {
            let allowed: BTreeSet<usize> = chunks.iter().map(|c| c.chunk_id).collect();
            verified_citations(mode, &answer, &allowed)
        } else {
            // non_rag 는 문서를 보지 않았으므로 인용 표기를 본문에서도 지움
            let stray = extract_citations(&answer);
            if !stray.is_empty() {
                tracing::warn!("Stripping {} citations from non_rag answer", stray.len());
                answer = strip_citations(&answer);
            }
            Vec::new()
        };

        let record = AnswerRecord {
            mode,
            citations,
            elapsed: start.elapsed(),
            prompt_tokens,
            completion_tokens,
            chunks_used: chunks.len(),
            context_tokens: chunks.iter().map(|c| c.token_count).sum(),
            model: self.provider.model().to_string(),
            answer,
        };

        tracing::info!(
            "Generated {} answer: {} chunks, {} prompt tokens, {} completion tokens, {:?}",
            mode,
            record.chunks_used,
            record.prompt_tokens,
            record.completion_tokens,
            record.elapsed
        );

        Ok(record)
    }

    /// 세 모드를 동시에 생성
    ///
    /// 같은 검색 결과를 rag/hybrid 가 공유합니다. 모드별 실패는 각 결과에 담깁니다.
    pub async fn generate_all(&self, query: &str, context: &RetrievalResult) -> ComparisonResult {
        let (rag, non_rag, hybrid) = futures::join!(
            self.generate(query, AnswerMode::Rag, context),
            self.generate(query, AnswerMode::NonRag, context),
            self.generate(query, AnswerMode::Hybrid, context),
        );

        ComparisonResult {
            rag,
            non_rag,
            hybrid,
        }
    }

    /// 문서 요약 생성
    pub async fn summarize(&self, context: &RetrievalResult) -> Result<DocumentSummary> {
        let start = Instant::now();

        if context.chunks.is_empty() {
            return Ok(DocumentSummary {
                summary: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
                chunks_used: 0,
                prompt_tokens: 0,
                completion_tokens: 0,
                elapsed: start.elapsed(),
            });
        }

        let request = CompletionRequest {
            system: prompt::summary_system_prompt().to_string(),
            user: prompt::summary_user_prompt(&context.chunks),
            temperature: self.summary.temperature,
            max_output_tokens: self.summary.max_completion_tokens,
        };
        let prompt_tokens = count_tokens(&request.system) + count_tokens(&request.user);

        let provider = &self.provider;
        let completion = self
            .retry
            .run("summary generation", self.timeout, |_| provider.complete(&request))
            .await
            .map_err(RagError::Summarization)?;

        let allowed: BTreeSet<usize> = context.chunks.iter().map(|c| c.chunk_id).collect();
        let citations = extract_citations(&completion.text)
            .into_iter()
            .filter(|id| allowed.contains(id))
            .collect();

        Ok(DocumentSummary {
            citations,
            chunks_used: context.chunks.len(),
            prompt_tokens,
            completion_tokens: completion
                .completion_tokens
                .unwrap_or_else(|| count_tokens(&completion.text)),
            elapsed: start.elapsed(),
            summary: completion.text,
        })
    }
}

// ============================================================================
// Citations
// ============================================================================

/// 답변의 `[Chunk N]`, `[Chunks 1, 2]` 표기에서 청크 id 추출 (오름차순, 중복 제거)
pub fn extract_citations(answer: &str) -> Vec<usize> {
    let ids: BTreeSet<usize> = CITATION_RE
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| NUMBER_RE.find_iter(m.as_str()))
        .filter_map(|n| n.as_str().parse().ok())
        .collect();
    ids.into_iter().collect()
}

/// 답변 본문에서 `[Chunk N]` 표기 제거
pub fn strip_citations(answer: &str) -> String {
    let stripped = CITATION_RE.replace_all(answer, "");
    LOOSE_SPACE_RE.replace_all(&stripped, "$1").trim().to_string()
}

/// 컨텍스트에 없는 청크를 가리키는 인용을 제거
fn verified_citations(mode: AnswerMode, answer: &str, allowed: &BTreeSet<usize>) -> Vec<usize> {
    let (kept, dropped): (Vec<usize>, Vec<usize>) = extract_citations(answer)
        .into_iter()
        .partition(|id| allowed.contains(id));

    if !dropped.is_empty() {
        tracing::warn!(
            "{} answer cited chunks not in context: {:?}",
            mode,
            dropped
        );
    }
    kept
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정으로 Gemini 생성기 생성
pub fn create_generator(config: &RagConfig) -> Result<Generator> {
    let provider = GeminiCompletion::from_env(
        config.provider.chat_model.clone(),
        config.request_timeout(),
    )?;
    tracing::info!("Using Gemini chat model: {}", config.provider.chat_model);
    Ok(Generator::from_config(Arc::new(provider), config))
}

// ============================================================================
// Tests
// ============================================================================
