//! Gemini Backend Implementation
//!
//! Cloud adapter for the Gemini `generateContent` REST API.
//!
//! The remote call takes one text blob, so the system prompt and the
//! role-tagged turns are flattened into a single transcript ending with an
//! open `Assistant:` line. Vendor error text is mapped onto
//! [`ProviderError`] through [`ERROR_MARKERS`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ProviderError, ProviderErrorKind};
use super::traits::{LlmBackend, SamplingConfig};
use crate::config::{CloudSettings, ConfigError};
use crate::memory::{Role, Turn};

/// Shown when the key is missing or rejected
pub const AUTH_MESSAGE: &str = "The cloud model rejected the request because the API key is \
missing or invalid. Check GEMINI_API_KEY in the server configuration.";

/// Shown when quota or rate limits are exhausted
pub const QUOTA_MESSAGE: &str = "The cloud model's usage quota or rate limit has been reached. \
Please wait a little while and try again.";

/// Shown when the API cannot be reached
pub const NETWORK_MESSAGE: &str = "Could not reach the cloud model service. Check the server's \
network connection and try again.";

/// Lowercase markers found in vendor error text, checked in order
///
/// Add new vendor strings here; nothing else needs to change.
pub const ERROR_MARKERS: &[(&str, ProviderErrorKind)] = &[
    ("api key not valid", ProviderErrorKind::Auth),
    ("api_key_invalid", ProviderErrorKind::Auth),
    ("invalid api key", ProviderErrorKind::Auth),
    ("api key expired", ProviderErrorKind::Auth),
    ("permission_denied", ProviderErrorKind::Auth),
    ("unauthenticated", ProviderErrorKind::Auth),
    ("resource_exhausted", ProviderErrorKind::Quota),
    ("quota", ProviderErrorKind::Quota),
    ("rate limit", ProviderErrorKind::Quota),
    ("too many requests", ProviderErrorKind::Quota),
    ("econnrefused", ProviderErrorKind::Network),
    ("enotfound", ProviderErrorKind::Network),
    ("etimedout", ProviderErrorKind::Network),
    ("fetch failed", ProviderErrorKind::Network),
    ("connection refused", ProviderErrorKind::Network),
    ("dns error", ProviderErrorKind::Network),
    ("error sending request", ProviderErrorKind::Network),
];

/// Map raw vendor error text to a classified error
///
/// Unmatched text becomes [`ProviderError::Unknown`] carrying the original
/// message.
#[must_use]
pub fn classify_error(raw: &str) -> ProviderError {
    let lower = raw.to_lowercase();
    let kind = ERROR_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map_or(ProviderErrorKind::Unknown, |(_, kind)| *kind);

    match kind {
        ProviderErrorKind::Auth => ProviderError::Auth(AUTH_MESSAGE.to_string()),
        ProviderErrorKind::Quota => ProviderError::Quota(QUOTA_MESSAGE.to_string()),
        ProviderErrorKind::Network => ProviderError::Network(NETWORK_MESSAGE.to_string()),
        ProviderErrorKind::Unknown => ProviderError::Unknown(raw.trim().to_string()),
    }
}

/// Gemini backend client
#[derive(Clone)]
pub struct GeminiBackend {
    api_key: String,
    model: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiBackend {
    /// Create a new Gemini backend
    ///
    /// Fails when the key is blank; the router reports that as an auth
    /// error at generation time.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                provider: "gemini",
                env_var: "GEMINI_API_KEY",
            });
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            api_key,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create from [`CloudSettings`]
    pub fn from_settings(settings: &CloudSettings, timeout: Duration) -> Result<Self, ConfigError> {
        let api_key = settings.api_key().ok_or(ConfigError::MissingCredential {
            provider: "gemini",
            env_var: "GEMINI_API_KEY",
        })?;
        Self::new(
            api_key,
            settings.model.clone(),
            settings.base_url.clone(),
            timeout,
        )
    }

    /// Configured model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn model_url(&self) -> String {
        format!("{}/models/{}", self.base_url, self.model)
    }

    /// Flatten the system prompt and turns into one transcript
    fn build_prompt(system_prompt: &str, turns: &[Turn]) -> String {
        let mut prompt = String::new();

        if !system_prompt.is_empty() {
            prompt.push_str(system_prompt);
            prompt.push_str("\n\n");
        }

        for turn in turns {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }

        prompt.push_str("Assistant:");
        prompt
    }

    fn map_request_error(e: &reqwest::Error) -> ProviderError {
        if e.is_connect() || e.is_timeout() {
            ProviderError::Network(NETWORK_MESSAGE.to_string())
        } else {
            classify_error(&e.to_string())
        }
    }

    fn map_status_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
        match status.as_u16() {
            401 | 403 => ProviderError::Auth(AUTH_MESSAGE.to_string()),
            429 => ProviderError::Quota(QUOTA_MESSAGE.to_string()),
            _ => match classify_error(body) {
                ProviderError::Unknown(_) => ProviderError::Unknown(format!(
                    "Cloud model error ({status}): {}",
                    vendor_message(body)
                )),
                classified => classified,
            },
        }
    }

    fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let text = text.trim();
        if !text.is_empty() {
            return Ok(text.to_string());
        }

        match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(ProviderError::Unknown(format!(
                "The cloud model declined to answer this message ({reason})."
            ))),
            None => Err(ProviderError::Unknown(
                "The cloud model returned an empty reply.".to_string(),
            )),
        }
    }
}

/// Pull `error.message` out of a Google error body, or fall back to the raw text
fn vendor_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn default_sampling(&self) -> SamplingConfig {
        SamplingConfig::cloud_default()
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.model_url())
            .header("x-goog-api-key", &self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        sampling: &SamplingConfig,
    ) -> Result<String, ProviderError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(Self::build_prompt(system_prompt, turns)),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                max_output_tokens: sampling.max_tokens,
            },
        };

        debug!(model = %self.model, turns = turns.len(), "Sending generateContent request");

        let response = self
            .http_client
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("Unreadable cloud model response: {e}")))?;

        Self::extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(base_url: &str) -> GeminiBackend {
        GeminiBackend::new("test-key", "gemini-test", base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_build_prompt() {
        let turns = vec![Turn::user("Hi"), Turn::assistant("Hello!"), Turn::user("How?")];
        assert_eq!(
            GeminiBackend::build_prompt("Be kind", &turns),
            "Be kind\n\nUser: Hi\nAssistant: Hello!\nUser: How?\nAssistant:"
        );
        assert_eq!(
            GeminiBackend::build_prompt("", &[Turn::user("Hi")]),
            "User: Hi\nAssistant:"
        );
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            classify_error("API key not valid. Please pass a valid API key.").kind(),
            ProviderErrorKind::Auth
        );
        assert_eq!(
            classify_error("429 RESOURCE_EXHAUSTED: Quota exceeded for metric").kind(),
            ProviderErrorKind::Quota
        );
        assert_eq!(
            classify_error("TypeError: fetch failed").kind(),
            ProviderErrorKind::Network
        );

        let unknown = classify_error("  The model is overloaded.  ");
        assert_eq!(unknown, ProviderError::Unknown("The model is overloaded.".to_string()));
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = GeminiBackend::new(" ", "m", "http://x", Duration::from_secs(1));
        assert!(matches!(result, Err(ConfigError::MissingCredential { .. })));

        let settings = CloudSettings::default();
        assert!(GeminiBackend::from_settings(&settings, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", backend("http://localhost"));
        assert!(!debug.contains("test-key"));
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "sys\n\nUser: hello\nAssistant:"}]}],
                "generationConfig": {"maxOutputTokens": 1024}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "  Hello "}, {"text": "friend.\n"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server.uri());
        let reply = backend
            .generate("sys", &[Turn::user("hello")], &backend.default_sampling())
            .await
            .unwrap();
        assert_eq!(reply, "Hello friend.");
    }

    #[tokio::test]
    async fn test_quota_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&server)
            .await;

        let err = backend(&server.uri())
            .generate("sys", &[Turn::user("hello")], &SamplingConfig::cloud_default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Quota(QUOTA_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_invalid_key_in_bad_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "API key not valid. Please pass a valid API key.",
                          "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let err = backend(&server.uri())
            .generate("sys", &[Turn::user("hello")], &SamplingConfig::cloud_default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_unknown_error_preserves_vendor_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"code": 500, "message": "Internal error encountered.", "status": "INTERNAL"}
            })))
            .mount(&server)
            .await;

        let err = backend(&server.uri())
            .generate("sys", &[Turn::user("hello")], &SamplingConfig::cloud_default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Unknown);
        assert!(err.user_message().contains("Internal error encountered."));
    }

    #[tokio::test]
    async fn test_blocked_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = backend(&server.uri())
            .generate("sys", &[Turn::user("hello")], &SamplingConfig::cloud_default())
            .await
            .unwrap_err();
        assert!(err.user_message().contains("SAFETY"));
    }
}
