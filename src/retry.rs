//! 재시도 정책 - 지수 백오프 + 호출별 타임아웃
//!
//! 외부 프로바이더 호출(임베딩, 완성)을 감싸서
//! 일시적 실패(429, 5xx, 타임아웃, 전송 실패)만 제한된 횟수로 재시도합니다.
//! 인증/검증 실패는 즉시 반환합니다.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// 기본 최대 시도 횟수 (최초 호출 포함)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 기본 초기 백오프 (ms)
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 2000;
/// 기본 최대 백오프 (ms)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// 재시도 정책
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 최초 호출을 포함한 총 시도 횟수
    pub max_attempts: u32,
    /// 첫 재시도 전 대기 시간 (ms)
    pub initial_backoff_ms: u64,
    /// 백오프 상한 (ms)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// 대기 없이 재시도 (테스트용)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// n번째 실패 후 대기 시간 (n은 1부터)
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.pow(exp))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// 재시도 루프 실행
    ///
    /// 매 시도마다 `timeout`을 적용하고, 재시도 가능한 에러면
    /// 백오프 후 다시 시도합니다. 마지막 에러를 그대로 반환합니다.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        label,
                        e,
                        backoff,
                        attempt,
                        max_attempts
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!("{} failed after {} attempts: {}", label, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
