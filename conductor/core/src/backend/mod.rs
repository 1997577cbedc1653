//! LLM Backend Integration
//!
//! This module provides abstracted access to generation backends through a
//! common trait interface.
//!
//! # Available Backends
//!
//! - **Gemini**: Cloud `generateContent` API (default)
//! - **Ollama**: Local model server
//!
//! The server never talks to a backend directly; it goes through
//! [`crate::router::ProviderRouter`], which builds only the selected one.
//!
//! # Usage
//!
//! ```ignore
//! use thera_conductor::backend::{LlmBackend, OllamaBackend};
//! use thera_conductor::memory::Turn;
//!
//! let backend = OllamaBackend::new("http://localhost:11434", "llama3", timeout)?;
//! let reply = backend
//!     .generate("You are kind.", &[Turn::user("Hello!")], &backend.default_sampling())
//!     .await?;
//! ```

mod error;
mod gemini;
mod ollama;
mod traits;

pub use error::{ProviderError, ProviderErrorKind};
pub use gemini::{
    classify_error, GeminiBackend, AUTH_MESSAGE, ERROR_MARKERS, NETWORK_MESSAGE, QUOTA_MESSAGE,
};
pub use ollama::OllamaBackend;
pub use traits::{LlmBackend, ModelDiagnostic, ModelInfo, SamplingConfig};
