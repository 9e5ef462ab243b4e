//! Google Gemini 텍스트 생성 프로바이더
//!
//! `generateContent` 엔드포인트에 시스템 지시문과 사용자 프롬프트를 보내고
//! 생성 텍스트와 usageMetadata 토큰 수를 돌려받습니다.
//!
//! source: https://ai.google.dev/api/generate-content

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::embedding::{classify_error, get_api_key, RateLimiter};
use crate::error::{ProviderError, RagError, Result};

use super::{Completion, CompletionProvider, CompletionRequest};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 채팅 모델
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash";

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<usize>,
    candidates_token_count: Option<usize>,
}

impl<'a> GenerateRequest<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: &request.system,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![TextPart {
                    text: &request.user,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

/// 응답 본문에서 텍스트/사용량 추출
fn parse_response(body: &str) -> std::result::Result<Completion, ProviderError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("generation response: {}", e)))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no candidates in response".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::MalformedResponse(format!(
            "empty completion (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }

    let usage = response.usage_metadata;
    Ok(Completion {
        text,
        prompt_tokens: usage.as_ref().and_then(|u| u.prompt_token_count),
        completion_tokens: usage.as_ref().and_then(|u| u.candidates_token_count),
    })
}

// ============================================================================
// GeminiCompletion
// ============================================================================

/// Gemini 채팅 모델 구현체
#[derive(Debug)]
pub struct GeminiCompletion {
    api_key: String,
    model: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiCompletion {
    pub fn new(api_key: String, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::Configuration("API key is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            model: model.into(),
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::gemini_default())),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(model: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::new(get_api_key()?, model, timeout)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }
}

#[async_trait]
impl CompletionProvider for GeminiCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let body = GenerateRequest::from_request(request);

        {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.acquire().await;
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        parse_response(&text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = CompletionRequest {
            system: "be brief".into(),
            user: "Question: why?".into(),
            temperature: 0.2,
            max_output_tokens: 1500,
        };
        let json = serde_json::to_value(GenerateRequest::from_request(&request)).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Question: why?");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1500);
    }

    #[test]
    fn test_parse_response_with_usage() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "Thirty days "}, {"text": "[Chunk 2]."}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 9}
        }"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.text, "Thirty days [Chunk 2].");
        assert_eq!(completion.prompt_tokens, Some(120));
        assert_eq!(completion.completion_tokens, Some(9));
    }

    #[test]
    fn test_parse_response_without_usage() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#;
        let completion = parse_response(body).unwrap();
        assert_eq!(completion.completion_tokens, None);
    }

    #[test]
    fn test_parse_response_rejects_empty() {
        let blocked = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        assert!(matches!(
            parse_response(blocked),
            Err(ProviderError::MalformedResponse(m)) if m.contains("SAFETY")
        ));
        assert!(parse_response(r#"{"candidates": []}"#).is_err());
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn test_endpoint_uses_model() {
        let provider =
            GeminiCompletion::new("key".into(), "gemini-2.0-flash", Duration::from_secs(5)).unwrap();
        assert!(provider
            .endpoint()
            .ends_with("/gemini-2.0-flash:generateContent"));
    }
}
