//! 테스트 전용 가짜 프로바이더
//!
//! 네트워크 없이 임베딩/완성 동작을 재현합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::{EmbedTask, EmbeddingProvider};
use crate::error::{ProviderError, Result};
use crate::generation::{Completion, CompletionProvider, CompletionRequest};
use crate::knowledge::{DocumentStatus, DocumentStatusLookup};

/// FakeEmbedding 키워드 (벡터 축 순서)
pub const KEYWORDS: [&str; 7] = [
    "alpha", "contract", "notice", "payment", "weather", "privacy", "penalty",
];

/// 키워드 축 + 기본 축 1개
pub const FAKE_DIMENSION: usize = KEYWORDS.len() + 1;

/// 첫 번째 축(alpha)과의 코사인이 `similarity`인 단위 벡터
pub fn axis_vector(similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0; FAKE_DIMENSION];
    v[0] = similarity;
    v[1] = (1.0 - similarity * similarity).max(0.0).sqrt();
    v
}

// ============================================================================
// FakeEmbedding
// ============================================================================

/// 키워드 출현 횟수로 벡터를 만드는 결정적 임베딩
///
/// 키워드가 하나도 없으면 마지막 기본 축을 사용하므로 영벡터는 나오지 않습니다.
#[derive(Debug, Default)]
pub struct FakeEmbedding {
    calls: AtomicUsize,
}

impl FakeEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect();
        let any = v.iter().any(|x| *x > 0.0);
        v.push(if any { 0.0 } else { 1.0 });
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed_batch(
        &self,
        texts: &[String],
        _task: EmbedTask,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        FAKE_DIMENSION
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// 매 호출마다 `delay` 만큼 기다리는 FakeEmbedding (처리 중 상태를 붙잡아 둘 때)
#[derive(Debug)]
pub struct SlowEmbedding {
    inner: FakeEmbedding,
    delay: Duration,
}

impl SlowEmbedding {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: FakeEmbedding::new(),
            delay,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedding {
    async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbedTask,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_batch(texts, task).await
    }

    fn dimension(&self) -> usize {
        FAKE_DIMENSION
    }

    fn name(&self) -> &str {
        "slow-fake"
    }
}

// ============================================================================
// ScriptedEmbedding
// ============================================================================

/// 처음 N번 실패한 뒤 성공하는 임베딩
#[derive(Debug)]
pub struct ScriptedEmbedding {
    failures: usize,
    error: ProviderError,
    short: bool,
    calls: AtomicUsize,
}

impl ScriptedEmbedding {
    pub fn failing(failures: usize, error: ProviderError) -> Self {
        Self {
            failures,
            error,
            short: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// 요청보다 벡터를 하나 적게 돌려줌
    pub fn short_response() -> Self {
        Self {
            failures: 0,
            error: ProviderError::RateLimited,
            short: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbedding {
    async fn embed_batch(
        &self,
        texts: &[String],
        _task: EmbedTask,
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }

        let n = if self.short {
            texts.len().saturating_sub(1)
        } else {
            texts.len()
        };
        Ok((0..n).map(|_| vec![0.5; 4]).collect())
    }

    fn dimension(&self) -> usize {
        4
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// EchoCompletion
// ============================================================================

/// 고정 답변을 돌려주고 요청을 기록하는 완성 프로바이더
#[derive(Debug)]
pub struct EchoCompletion {
    reply: String,
    usage: Option<(usize, usize)>,
    fail_when: Option<(String, ProviderError)>,
    always_fail: Option<ProviderError>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl EchoCompletion {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            usage: None,
            fail_when: None,
            always_fail: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        let mut echo = Self::new("");
        echo.always_fail = Some(error);
        echo
    }

    /// 프로바이더가 보고하는 토큰 수
    pub fn with_usage(mut self, prompt: usize, completion: usize) -> Self {
        self.usage = Some((prompt, completion));
        self
    }

    /// 시스템/사용자 프롬프트에 `needle`이 있으면 실패
    pub fn fail_when(mut self, needle: &str, error: ProviderError) -> Self {
        self.fail_when = Some((needle.to_string(), error));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for EchoCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        if let Some((needle, error)) = &self.fail_when {
            if request.system.contains(needle.as_str()) || request.user.contains(needle.as_str()) {
                return Err(error.clone());
            }
        }

        Ok(Completion {
            text: self.reply.clone(),
            prompt_tokens: self.usage.map(|u| u.0),
            completion_tokens: self.usage.map(|u| u.1),
        })
    }

    fn model(&self) -> &str {
        "echo"
    }
}

// ============================================================================
// StaticStatus
// ============================================================================

/// 고정 상태표
#[derive(Debug, Default)]
pub struct StaticStatus {
    statuses: HashMap<i64, DocumentStatus>,
}

impl StaticStatus {
    pub fn single(document_id: i64, status: DocumentStatus) -> Self {
        Self {
            statuses: HashMap::from([(document_id, status)]),
        }
    }
}

impl DocumentStatusLookup for StaticStatus {
    fn document_status(&self, document_id: i64) -> Result<Option<DocumentStatus>> {
        Ok(self.statuses.get(&document_id).copied())
    }
}
