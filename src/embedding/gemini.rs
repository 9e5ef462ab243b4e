//! Google Gemini 임베딩 프로바이더
//!
//! `batchEmbedContents` 엔드포인트로 한 번의 호출에 여러 텍스트를 임베딩합니다.
//! 재시도는 하지 않습니다 (상위 `Embedder`가 `RetryPolicy`로 처리).
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::SUPPORTED_DIMENSIONS;
use crate::error::{ProviderError, RagError, Result};

use super::{get_api_key, EmbedTask, EmbeddingProvider};

/// Gemini 배치 임베딩 엔드포인트
const GEMINI_BATCH_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:batchEmbedContents";

const EMBED_MODEL: &str = "models/gemini-embedding-001";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 1000;

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 + 최소 간격 Rate Limiter
#[derive(Debug)]
pub(crate) struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay,
            last_request: None,
        }
    }

    /// Gemini 무료 티어 기본값
    pub(crate) fn gemini_default() -> Self {
        Self::new(
            RATE_LIMIT_RPM,
            RATE_LIMIT_WINDOW,
            Duration::from_millis(MIN_DELAY_MS),
        )
    }

    /// 요청 가능할 때까지 대기 후 요청 기록
    pub(crate) async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. 한도 초과 시 가장 오래된 요청이 빠질 때까지 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }

    #[cfg(test)]
    fn in_window(&self) -> usize {
        self.requests.len()
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'static str,
    content: EmbedContent<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
pub(crate) struct GeminiError {
    pub(crate) error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) status: String,
}

/// HTTP 에러 응답을 ProviderError로 변환
pub(crate) fn classify_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = match serde_json::from_str::<GeminiError>(body) {
        Ok(e) if e.error.status.is_empty() => e.error.message,
        Ok(e) => format!("{}: {}", e.error.status, e.error.message),
        Err(_) => body.chars().take(500).collect(),
    };
    ProviderError::from_status(status.as_u16(), message)
}

fn task_type(task: EmbedTask) -> &'static str {
    match task {
        EmbedTask::Document => "RETRIEVAL_DOCUMENT",
        EmbedTask::Query => "RETRIEVAL_QUERY",
    }
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    /// * `timeout` - HTTP 요청 타임아웃
    pub fn new(api_key: String, dimension: usize, timeout: Duration) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            return Err(RagError::Configuration(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            )));
        }
        if api_key.trim().is_empty() {
            return Err(RagError::Configuration("API key is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::gemini_default())),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(dimension: usize, timeout: Duration) -> Result<Self> {
        Self::new(get_api_key()?, dimension, timeout)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbedTask,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: EMBED_MODEL,
                    content: EmbedContent {
                        parts: vec![EmbedPart { text }],
                    },
                    task_type: task_type(task),
                    output_dimensionality: Some(self.dimension),
                })
                .collect(),
        };

        {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.acquire().await;
        }

        // API 키는 URL이 아닌 헤더로 전송
        let response = self
            .client
            .post(GEMINI_BATCH_EMBED_URL)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let parsed: BatchEmbedResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("embedding response: {}", e)))?;

        tracing::debug!("Embedded {} texts ({:?})", parsed.embeddings.len(), task);
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// Tests
// ============================================================================
