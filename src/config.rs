//! 설정 모듈
//!
//! 청킹/검색/생성 파라미터를 하나의 값 객체로 모아
//! 각 컴포넌트 생성자에 명시적으로 전달합니다.
//!
//! 로드 순서: `<data_dir>/config.json` (없으면 기본값) → 환경변수 오버라이드

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::generation::AnswerMode;
use crate::retry::RetryPolicy;

/// 설정 파일 이름
pub const CONFIG_FILE_NAME: &str = "config.json";

/// 채팅 모델 오버라이드 환경변수
pub const CHAT_MODEL_ENV: &str = "DOCQA_CHAT_MODEL";

/// 지원하는 임베딩 차원 (gemini-embedding-001 MRL)
pub const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.docqa/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docqa")
}

// ============================================================================
// Config Types
// ============================================================================

/// 모드별 디코딩 온도
///
/// rag는 재현성을 위해 낮게, hybrid는 완결성을 위해 조금 높게 둡니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeTemperatures {
    pub rag: f32,
    pub non_rag: f32,
    pub hybrid: f32,
}

impl Default for ModeTemperatures {
    fn default() -> Self {
        Self {
            rag: 0.2,
            non_rag: 0.2,
            hybrid: 0.3,
        }
    }
}

impl ModeTemperatures {
    /// 모드에 해당하는 온도
    pub fn for_mode(&self, mode: AnswerMode) -> f32 {
        match mode {
            AnswerMode::Rag => self.rag,
            AnswerMode::NonRag => self.non_rag,
            AnswerMode::Hybrid => self.hybrid,
        }
    }
}

/// 문서 요약 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub top_k: usize,
    pub temperature: f32,
    pub max_completion_tokens: u32,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            temperature: 0.3,
            max_completion_tokens: 800,
        }
    }
}

/// 외부 프로바이더 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 채팅 모델 이름
    pub chat_model: String,
    /// 임베딩 차원 (768, 1536, 3072)
    pub embedding_dimension: usize,
    /// 호출별 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            chat_model: "gemini-2.0-flash".to_string(),
            embedding_dimension: 768,
            request_timeout_secs: 30,
        }
    }
}

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// 청크 최대 토큰 수
    pub chunk_size: usize,
    /// 청크 간 오버랩 토큰 수
    pub chunk_overlap: usize,
    /// 유사도 상위 청크 수
    pub top_k: usize,
    /// 이웃 청크 윈도우
    pub neighbor_window: usize,
    /// 컨텍스트로 제공할 청크 토큰 합계 상한
    pub token_budget: usize,
    /// 답변 최대 토큰 수
    pub max_completion_tokens: u32,
    pub temperatures: ModeTemperatures,
    pub summary: SummaryConfig,
    pub provider: ProviderConfig,
    pub retry: RetryPolicy,
    /// 이 시간(초) 동안 리스가 갱신되지 않은 processing 문서는 중단된 것으로 봄
    pub stale_processing_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            neighbor_window: 1,
            // 8000 컨텍스트 중 2000은 답변용으로 남김
            token_budget: 6000,
            max_completion_tokens: 1500,
            temperatures: ModeTemperatures::default(),
            summary: SummaryConfig::default(),
            provider: ProviderConfig::default(),
            retry: RetryPolicy::default(),
            stale_processing_secs: 15 * 60,
        }
    }
}

impl RagConfig {
    /// JSON 파일에서 로드 (파일이 없으면 기본값)
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&raw).map_err(|e| {
                RagError::Configuration(format!("invalid config file {:?}: {}", path, e))
            })?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// 기본 위치에서 로드 (~/.docqa/config.json)
    pub fn load_default() -> Result<Self> {
        Self::load(&get_data_dir().join(CONFIG_FILE_NAME))
    }

    /// 환경변수 오버라이드 적용
    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var(CHAT_MODEL_ENV) {
            if !model.trim().is_empty() {
                self.provider.chat_model = model.trim().to_string();
            }
        }
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RagError::Configuration(msg));

        if self.chunk_size == 0 {
            return fail("chunk_size must be greater than 0".into());
        }
        if self.chunk_overlap >= self.chunk_size {
            return fail(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 || self.summary.top_k == 0 {
            return fail("top_k must be greater than 0".into());
        }
        if self.token_budget == 0 {
            return fail("token_budget must be greater than 0".into());
        }
        if self.max_completion_tokens == 0 || self.summary.max_completion_tokens == 0 {
            return fail("max_completion_tokens must be greater than 0".into());
        }

        let temps = [
            self.temperatures.rag,
            self.temperatures.non_rag,
            self.temperatures.hybrid,
            self.summary.temperature,
        ];
        if temps.iter().any(|t| !(0.0..=2.0).contains(t)) {
            return fail("temperatures must be within 0.0..=2.0".into());
        }

        if !SUPPORTED_DIMENSIONS.contains(&self.provider.embedding_dimension) {
            return fail(format!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                self.provider.embedding_dimension
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".into());
        }

        Ok(())
    }

    /// 호출별 타임아웃
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider.request_timeout_secs.max(1))
    }

    /// processing 리스 만료 시간
    pub fn stale_processing_after(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_processing_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
