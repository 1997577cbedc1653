//! LLM Backend Traits
//!
//! Trait definitions for generation backends. This abstraction lets the
//! Conductor drive a cloud API or a local model server without changing
//! core logic.
//!
//! # Design Philosophy
//!
//! The `LlmBackend` trait provides a common interface for:
//! - Producing one complete reply from a system prompt and ordered turns
//! - Health checking the backend
//! - Reporting the sampling defaults the backend is tuned for
//!
//! Implementations handle provider-specific details (wire formats, auth,
//! error text) and normalize every failure into a [`ProviderError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use crate::memory::Turn;

/// Sampling parameters for one generation call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Temperature (higher = more creative)
    pub temperature: f32,
    /// Nucleus sampling cutoff, if the backend uses it
    pub top_p: Option<f32>,
    /// Maximum tokens in the reply
    pub max_tokens: u32,
    /// Repetition penalty, if the backend uses it
    pub repeat_penalty: Option<f32>,
}

impl SamplingConfig {
    /// Cloud defaults: longer, multi-paragraph replies
    #[must_use]
    pub fn cloud_default() -> Self {
        Self {
            temperature: 0.9,
            top_p: Some(0.95),
            max_tokens: 1024,
            repeat_penalty: None,
        }
    }

    /// Local defaults: shorter, more constrained replies
    #[must_use]
    pub fn local_default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            max_tokens: 256,
            repeat_penalty: Some(1.1),
        }
    }
}

/// Information about an installed model
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

/// Result of checking the local model server for the configured model
#[derive(Clone, Debug)]
pub struct ModelDiagnostic {
    /// Model name from configuration
    pub configured_model: String,
    /// Models the server reports as installed
    pub installed: Vec<ModelInfo>,
    /// Whether the configured model is among them
    pub configured_present: bool,
}

/// Generation backend trait
///
/// Implement this trait to add support for a different provider.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "gemini", "ollama")
    fn name(&self) -> &str;

    /// Sampling parameters this backend is tuned for
    fn default_sampling(&self) -> SamplingConfig;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Produce one complete reply
    ///
    /// `turns` is the full ordered conversation (few-shot examples, memory,
    /// and the new user turn); `system_prompt` is sent ahead of it.
    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        sampling: &SamplingConfig,
    ) -> Result<String, ProviderError>;
}
