//! Thera Conductor - Session Orchestration Core
//!
//! This crate mediates real-time conversations between connected clients and
//! one interchangeable text-generation backend. Every input passes a
//! deterministic safety gate before any backend is contacted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     WebSocket clients                            │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │  JSON text frames
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                    CONDUCTOR CORE                                │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │               Conductor (session manager)                   │ │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────┐ │ │
//! │  │  │ Registry │  │  Safety  │  │ Persona  │  │   Provider   │ │ │
//! │  │  │+ Session │  │   Gate   │  │ Provider │  │    Router    │ │ │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └──────┬───────┘ │ │
//! │  └───────────────────────────────────────────────────┼─────────┘ │
//! │                                          ┌───────────┴────────┐  │
//! │                                          │ Gemini │  Ollama   │  │
//! │                                          └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: owns sessions and runs each exchange
//! - [`ProviderRouter`]: the process-wide backend selection
//! - [`SafetyGate`]: crisis-phrase check ahead of every generation
//! - [`ConversationMemory`]: bounded per-session turn log
//! - [`ClientFrame`] / [`ServerFrame`]: the wire protocol
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use thera_conductor::{load_config, BuiltinPersonas, Conductor, ProviderRouter};
//!
//! let config = load_config(None)?;
//! let router = ProviderRouter::new(&config);
//! let conductor = Arc::new(Conductor::new(router, Arc::new(BuiltinPersonas::new()), config));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8787").await?;
//! thera_conductor::transport::serve(listener, conductor, tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod memory;
pub mod messages;
pub mod persona;
pub mod registry;
pub mod router;
pub mod safety;
pub mod session;
pub mod transport;

pub use backend::{
    GeminiBackend, LlmBackend, ModelDiagnostic, ModelInfo, OllamaBackend, ProviderError,
    ProviderErrorKind, SamplingConfig,
};
pub use conductor::{Conductor, ExchangeOutcome, MEMORY_CLEARED};
pub use config::{
    default_config_path, load_config, load_config_from_path, CloudSettings, ConductorConfig,
    ConfigError, ConfigOverrides, LocalSettings, ProviderKind, ServerSettings,
};
pub use memory::{ConversationMemory, Role, Turn, DEFAULT_MEMORY_CAP};
pub use messages::{ClientFrame, ServerFrame, PERSONA_SPEAKER};
pub use persona::{
    resolve_persona, BuiltinPersonas, DirectoryPersonas, PersonaContext, PersonaLoadError,
    PersonaProvider, DEFAULT_PERSONA_ID,
};
pub use registry::{ConnectionId, ConnectionRegistry, Outbound};
pub use router::{ActiveBackend, ProviderRouter};
pub use safety::{SafetyGate, SafetyVerdict, SAFETY_MESSAGE};
pub use session::{Session, SessionId};
pub use transport::ProtocolError;
