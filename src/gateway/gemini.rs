//! Gemini adapter for generateContent calls.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for generative content providers.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

// =============================================================================
// GEMINI ADAPTER
// =============================================================================

const PROVIDER: &str = "gemini";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed prompt characters.
const MAX_PROMPT_CHARS: usize = 500_000;

/// Gemini API adapter.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    /// Create from API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    /// Create from environment variables.
    ///
    /// `GEMINI_API_KEY` (or `API_KEY`) is required; `GEMINI_BASE_URL` and
    /// `GEMINI_TIMEOUT_SECONDS` are optional.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| ProviderError::config("GEMINI_API_KEY not set"))?;

        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("GEMINI_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        if api_key.trim().is_empty() {
            return Err(ProviderError::config("Gemini API key is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert("x-goog-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn error_from_status(status: u16, body: &str) -> ProviderError {
        let ctx = ErrorContext::new().with_status(status);

        let (message, provider_status) = match serde_json::from_str::<GenerateApiResponse>(body) {
            Ok(GenerateApiResponse {
                error: Some(error), ..
            }) => (error.message.unwrap_or_default(), error.status),
            _ => (String::new(), None),
        };

        if status == 429 {
            let ctx = match provider_status {
                Some(s) => ctx.with_provider_status(s),
                None => ctx,
            };
            return ProviderError::rate_limited(PROVIDER, Duration::from_secs(60), ctx);
        }

        let mut label = format!("HTTP {status}");
        let ctx = match provider_status {
            Some(s) => {
                label.push(' ');
                label.push_str(&s);
                ctx.with_provider_status(s)
            }
            None => ctx,
        };
        let message = if message.is_empty() {
            label
        } else {
            format!("{label}: {message}")
        };

        ProviderError::provider_with_context(PROVIDER, message, ctx)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateApiRequest<'a> {
    contents: [ApiContent<'a>; 1],
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct ApiContent<'a> {
    role: &'static str,
    parts: [ApiPart<'a>; 1],
}

#[derive(Serialize)]
struct ApiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateApiResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Deserialize)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

// =============================================================================
// CONTENT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ContentProvider for GeminiAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        if req.prompt.len() > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Prompt too large: {} chars (max {MAX_PROMPT_CHARS})",
                req.prompt.len()
            )));
        }

        let start = Instant::now();

        let api_req = GenerateApiRequest {
            contents: [ApiContent {
                role: "user",
                parts: [ApiPart { text: &req.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: req.temperature,
                response_mime_type: req
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json"),
                response_schema: req.response_schema.as_ref().map(ResponseSchema::to_value),
            },
            tools: if req.grounding {
                vec![serde_json::json!({ "googleSearch": {} })]
            } else {
                Vec::new()
            },
        };

        let mut response = self
            .client
            .post(self.generate_url(req.model.model_id()))
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            return Err(Self::error_from_status(status.as_u16(), &body));
        }

        let parsed: GenerateApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(ProviderError::provider(PROVIDER, message));
        }

        let candidate = parsed.candidates.and_then(|c| c.into_iter().next());
        let Some(candidate) = candidate else {
            if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ProviderError::invalid_request(format!(
                    "prompt blocked: {reason}"
                )));
            }
            return Err(ProviderError::empty_response(PROVIDER));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::empty_response(PROVIDER));
        }

        let citations = candidate
            .grounding_metadata
            .map(|m| {
                m.grounding_chunks
                    .into_iter()
                    .filter_map(|chunk| chunk.web)
                    .filter_map(|web| {
                        let uri = web.uri?;
                        let title = web.title.unwrap_or_else(|| uri.clone());
                        Some(GroundingCitation { uri, title })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(GenerateResponse {
            text,
            citations,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(candidate.finish_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_carry_provider_status() {
        let body = r#"{"error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}}"#;
        let err = GeminiAdapter::error_from_status(503, body);
        assert_eq!(
            err.to_string(),
            "gemini error: HTTP 503 UNAVAILABLE: The model is overloaded."
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.context().and_then(|c| c.provider_status.as_deref()),
            Some("UNAVAILABLE")
        );
    }

    #[test]
    fn status_errors_without_body() {
        let err = GeminiAdapter::error_from_status(500, "<html>oops</html>");
        assert_eq!(err.to_string(), "gemini error: HTTP 500");
        assert!(!err.is_retryable());
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        let err = GeminiAdapter::error_from_status(429, "{}");
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            GeminiAdapter::new("  "),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn url_trims_trailing_slash() {
        let adapter =
            GeminiAdapter::with_config("k", "http://localhost:1234/v1beta/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            adapter.generate_url("gemini-2.5-flash"),
            "http://localhost:1234/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
