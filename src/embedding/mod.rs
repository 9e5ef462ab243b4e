//! 임베딩 모듈 - 텍스트 벡터화
//!
//! `EmbeddingProvider`는 외부 서비스 호출 1회를 표현하고,
//! `Embedder`가 그 위에서 배치 분할, 재시도, 타임아웃, 결과 검증을 담당합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let provider = Arc::new(GeminiEmbedding::from_env(768, Duration::from_secs(30))?);
//! let embedder = Embedder::from_config(provider, &config);
//! let vectors = embedder.embed(&texts).await?;
//! let query = embedder.embed_one("What does section 4 require?").await?;
//! ```

mod gemini;

pub use gemini::{GeminiEmbedding, DEFAULT_DIMENSION};
pub(crate) use gemini::{classify_error, RateLimiter};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RagConfig;
use crate::error::{ProviderError, RagError, Result};
use crate::retry::RetryPolicy;

/// 외부 호출 1회당 텍스트 수
pub const EMBED_BATCH_SIZE: usize = 100;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 용도 (문서 청크 / 검색 쿼리)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    Document,
    Query,
}

/// 임베딩 프로바이더 트레이트
///
/// 한 번의 외부 호출로 텍스트 배치를 벡터로 변환합니다.
/// 입력과 같은 순서로 입력 수만큼의 벡터를 반환해야 합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩 (재시도 없음)
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbedTask,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Embedder
// ============================================================================

/// 배치 분할 + 재시도 + 검증을 담당하는 임베더
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self::new(provider, config.retry.clone(), config.request_timeout())
    }

    /// 벡터 차원
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 문서 텍스트 임베딩 (입력 순서 유지)
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_with(texts, EmbedTask::Document).await
    }

    /// 쿼리 1개 임베딩
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let mut vectors = self
            .embed_with(&[text.to_string()], EmbedTask::Query)
            .await?;
        vectors.pop().ok_or_else(|| {
            RagError::EmbeddingService(ProviderError::MalformedResponse(
                "no vector returned for query".into(),
            ))
        })
    }

    async fn embed_with(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let batches = texts.len().div_ceil(EMBED_BATCH_SIZE);

        for (i, batch) in texts.chunks(EMBED_BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{} ({} texts) via {}",
                i + 1,
                batches,
                batch.len(),
                self.provider.name()
            );

            let provider = &self.provider;
            let batch_vectors = self
                .retry
                .run("embedding", self.timeout, |_| provider.embed_batch(batch, task))
                .await
                .map_err(RagError::EmbeddingService)?;

            self.validate(batch.len(), &batch_vectors)?;
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    /// 개수/차원 검증 (빈 벡터나 개수 불일치를 그대로 통과시키지 않음)
    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(RagError::EmbeddingService(ProviderError::MalformedResponse(
                format!("expected {} vectors, got {}", expected, vectors.len()),
            )));
        }

        let dimension = self.provider.dimension();
        for v in vectors {
            if v.is_empty() {
                return Err(RagError::EmbeddingService(ProviderError::MalformedResponse(
                    "empty embedding vector".into(),
                )));
            }
            if v.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: v.len(),
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key.trim().to_string());
            }
        }
    }

    Err(RagError::Configuration(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
            .into(),
    ))
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정으로 Gemini 임베더 생성
pub fn create_embedder(config: &RagConfig) -> Result<Embedder> {
    let provider = GeminiEmbedding::from_env(
        config.provider.embedding_dimension,
        config.request_timeout(),
    )?;
    tracing::info!(
        "Using Gemini API embedding (dimension: {})",
        config.provider.embedding_dimension
    );
    Ok(Embedder::from_config(Arc::new(provider), config))
}

// ============================================================================
// Tests
// ============================================================================
