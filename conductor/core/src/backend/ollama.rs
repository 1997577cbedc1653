//! Ollama Backend Implementation
//!
//! Local adapter for an Ollama server.
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completion over a structured message list
//! - `/api/tags` - List installed models
//!
//! Generation uses the chat endpoint in non-streaming mode: one request,
//! one JSON response, one reply.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ProviderError;
use super::traits::{LlmBackend, ModelDiagnostic, ModelInfo, SamplingConfig};
use crate::config::{ConfigError, LocalSettings};
use crate::memory::Turn;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Base URL without trailing slash
    base_url: String,
    /// Model used for generation
    model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    size: Option<u64>,
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    parameter_size: Option<String>,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
        })
    }

    /// Create from [`LocalSettings`]
    pub fn from_settings(settings: &LocalSettings, timeout: Duration) -> Result<Self, ConfigError> {
        Self::new(settings.base_url.clone(), settings.model.clone(), timeout)
    }

    /// Configured model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    /// System message first, then the conversation in order
    fn build_messages<'a>(system_prompt: &'a str, turns: &'a [Turn]) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt,
        });
        messages.extend(turns.iter().map(|turn| ChatMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));
        messages
    }

    /// Remediation text for an unreachable server
    fn unreachable_message(&self) -> String {
        format!(
            "The local model service is not running at {}. Start it with `ollama serve` \
             (and make sure the model is installed with `ollama pull {}`), then try again.",
            self.base_url, self.model
        )
    }

    fn map_request_error(&self, e: &reqwest::Error) -> ProviderError {
        if e.is_connect() {
            ProviderError::Network(self.unreachable_message())
        } else if e.is_timeout() {
            ProviderError::Network(format!(
                "The local model service at {} did not answer in time. It may still be \
                 loading model '{}'; please try again in a moment.",
                self.base_url, self.model
            ))
        } else {
            ProviderError::Unknown(format!("Local model request failed: {e}"))
        }
    }

    fn map_status_error(&self, status: reqwest::StatusCode, body: &str) -> ProviderError {
        if status == reqwest::StatusCode::NOT_FOUND && body.contains("not found") {
            ProviderError::Unknown(format!(
                "Model '{}' is not installed on the local model service. Install it with \
                 `ollama pull {}`.",
                self.model, self.model
            ))
        } else {
            ProviderError::Unknown(format!("Local model service returned {status}: {body}"))
        }
    }

    /// List installed models
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_status_error(status, &body));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("Unreadable model list: {e}")))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                size: m.size,
                parameters: m.details.and_then(|d| d.parameter_size),
            })
            .collect())
    }

    /// Check whether the configured model is installed
    ///
    /// Diagnostic only; never called on the generation path.
    pub async fn diagnose(&self) -> Result<ModelDiagnostic, ProviderError> {
        let installed = self.list_models().await?;
        let tagged = format!("{}:latest", self.model);
        let configured_present = installed
            .iter()
            .any(|m| m.name == self.model || m.name == tagged);

        Ok(ModelDiagnostic {
            configured_model: self.model.clone(),
            installed,
            configured_present,
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn default_sampling(&self) -> SamplingConfig {
        SamplingConfig::local_default()
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        sampling: &SamplingConfig,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: Self::build_messages(system_prompt, turns),
            stream: false,
            options: ChatOptions {
                temperature: sampling.temperature,
                num_predict: sampling.max_tokens,
                repeat_penalty: sampling.repeat_penalty,
                top_p: sampling.top_p,
            },
        };

        debug!(model = %self.model, messages = request.messages.len(), "Sending chat request");

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.map_status_error(status, &body));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("Unreadable local model response: {e}")))?;

        let content = data
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::Unknown(
                "The local model returned an empty reply.".to_string(),
            ));
        }

        Ok(content)
    }
}
