//! 에러 타입
//!
//! 라이브러리 전반에서 사용하는 타입 에러입니다.
//! - 입력 에러: 호출자 책임, 재시도하지 않음
//! - 외부 서비스 에러: 컴포넌트 내부에서 제한된 재시도 후 전파
//! - 데이터 무결성 에러: 현재 수집 작업만 실패
//! - 설정 에러: 시작 시점 또는 첫 호출에서 즉시 실패

use thiserror::Error;

use crate::generation::AnswerMode;
use crate::knowledge::DocumentStatus;

/// 라이브러리 Result 별칭
pub type Result<T> = std::result::Result<T, RagError>;

// ============================================================================
// ProviderError
// ============================================================================

/// 외부 임베딩/완성 프로바이더 호출 실패
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("rate limit exceeded (429)")]
    RateLimited,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// 재시도 가능한 일시적 실패인지 여부
    ///
    /// rate limit, 5xx, 타임아웃, 전송 실패만 재시도합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Server { .. } | Self::Timeout(_) | Self::Transport(_)
        )
    }

    /// HTTP 상태 코드와 본문으로 에러 분류
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited,
            401 | 403 => Self::Auth(message),
            500..=599 => Self::Server { status, message },
            _ => Self::InvalidRequest(format!("({}) {}", status, message)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(std::time::Duration::ZERO)
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// ============================================================================
// RagError
// ============================================================================

/// 문서 질의응답 코어 에러
#[derive(Error, Debug)]
pub enum RagError {
    #[error("document has no extractable sentences")]
    EmptyDocument,

    #[error("query is empty")]
    EmptyQuery,

    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("document {document_id} is not ready (status: {status})")]
    DocumentNotReady {
        document_id: i64,
        status: DocumentStatus,
    },

    #[error("embedding service error: {0}")]
    EmbeddingService(ProviderError),

    #[error("generation failed in {mode} mode: {source}")]
    Generation {
        mode: AnswerMode,
        #[source]
        source: ProviderError,
    },

    #[error("summary generation failed: {0}")]
    Summarization(ProviderError),

    #[error("duplicate chunk {chunk_id} for document {document_id}")]
    DuplicateChunk { document_id: i64, chunk_id: usize },

    #[error("chunk {got} for document {document_id} is out of order (expected {expected})")]
    ChunkOutOfOrder {
        document_id: i64,
        expected: usize,
        got: usize,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid status transition for document {document_id}: {from} -> {to}")]
    InvalidStatusTransition {
        document_id: i64,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("document {0} is being processed by another instance")]
    LeaseLost(i64),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("ingestion queue is closed")]
    QueueClosed,
}

impl RagError {
    /// 호출자 입력 문제로 인한 에러 (재시도 불가)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyDocument
                | Self::EmptyQuery
                | Self::DocumentNotFound(_)
                | Self::DocumentNotReady { .. }
        )
    }

    /// 외부 서비스의 일시적 실패인지 여부
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingService(e) => e.is_retryable(),
            Self::Generation { source, .. } => source.is_retryable(),
            Self::Summarization(e) => e.is_retryable(),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
