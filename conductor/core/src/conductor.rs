//! Conductor - The Session Manager
//!
//! The Conductor owns every live session and runs each inbound frame
//! through the exchange pipeline:
//!
//! ```text
//! text_input ─► trim ─► final_stt ─► SafetyGate ─┬─ flagged ─► canned persona_say
//!                                                └─ clear ───► persona ─► memory ─► backend
//!                                                                   ├─ ok  ─► persona_say
//!                                                                   └─ err ─► error
//! ```
//!
//! # Design Philosophy
//!
//! The Conductor is transport-agnostic. It receives raw text frames and
//! pushes [`Outbound`] items into a per-connection channel; the WebSocket
//! layer (or a test harness) does the actual I/O. Every failure on the
//! generation path is turned into an `error` frame here, so a connection
//! never drops because of a backend or protocol problem.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::LlmBackend;
use crate::config::ConductorConfig;
use crate::memory::Turn;
use crate::messages::{ClientFrame, ServerFrame};
use crate::persona::{resolve_persona, PersonaProvider};
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound};
use crate::safety::SafetyGate;
use crate::session::Session;
use crate::transport::frame;

/// Info text sent after a reset
pub const MEMORY_CLEARED: &str = "Memory cleared";

/// What happened to one inbound frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Nothing to do (unknown type, blank input, or unknown connection)
    Ignored,
    /// Malformed frame answered with an error
    Rejected,
    /// Persona switch or reset acknowledged
    Acknowledged,
    /// Safety gate answered without calling the backend
    Canned,
    /// Backend produced a reply
    Generated,
    /// Backend failed; memory untouched
    Failed,
}

/// The Conductor - per-connection session orchestration
pub struct Conductor<B: LlmBackend> {
    backend: Arc<B>,
    personas: Arc<dyn PersonaProvider>,
    safety: SafetyGate,
    config: ConductorConfig,
    registry: ConnectionRegistry,
}

impl<B: LlmBackend + 'static> Conductor<B> {
    /// Create a new Conductor
    pub fn new(backend: B, personas: Arc<dyn PersonaProvider>, config: ConductorConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            personas,
            safety: SafetyGate::new(),
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    /// The generation backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Number of live sessions
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// Open a session for a new connection
    ///
    /// Sends `ready` and the provider `info`, then starts the keepalive timer.
    pub async fn on_connect(
        &self,
        tx: mpsc::Sender<Outbound>,
        user_id: Option<String>,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let session = Session::new(user_id, self.config.memory_cap);
        let session_id = session.id.clone();
        let handle = self.registry.register(ConnectionHandle::new(id, tx, session));

        info!(conn_id = %id, session_id = %session_id, "Connection opened");

        handle.send(ServerFrame::Ready).await;
        handle
            .send(ServerFrame::info(format!("Provider: {}", self.backend.name())))
            .await;

        handle.set_keepalive(self.spawn_keepalive(id, handle.sender()));
        id
    }

    fn spawn_keepalive(
        &self,
        id: ConnectionId,
        tx: mpsc::Sender<Outbound>,
    ) -> tokio::task::JoinHandle<()> {
        let period = self.config.keepalive_interval();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match tx.try_send(Outbound::Keepalive) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(conn_id = %id, "Keepalive skipped, outbound queue full");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(conn_id = %id, "Keepalive stopped, connection gone");
                        break;
                    }
                }
            }
        })
    }

    /// Handle one inbound text frame
    pub async fn on_frame(&self, id: ConnectionId, raw: &str) -> ExchangeOutcome {
        let Some(handle) = self.registry.get(&id) else {
            warn!(conn_id = %id, "Frame for unknown connection");
            return ExchangeOutcome::Ignored;
        };

        let frame = match frame::decode(raw, self.config.server.max_frame_bytes) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(conn_id = %id, "Ignoring frame with unrecognized type");
                return ExchangeOutcome::Ignored;
            }
            Err(e) => {
                debug!(conn_id = %id, error = %e, "Malformed frame");
                handle.send(ServerFrame::error(e.to_string())).await;
                return ExchangeOutcome::Rejected;
            }
        };

        match frame {
            ClientFrame::SetPersona { persona } => {
                let mut session = handle.session.lock().await;
                let persona = session.set_persona(persona.as_deref()).to_string();
                info!(conn_id = %id, persona = %persona, "Persona switched");
                handle
                    .send(ServerFrame::info(format!("Persona set to {persona}")))
                    .await;
                ExchangeOutcome::Acknowledged
            }
            ClientFrame::Reset => {
                let mut session = handle.session.lock().await;
                session.reset_memory();
                debug!(conn_id = %id, "Memory cleared");
                handle.send(ServerFrame::info(MEMORY_CLEARED)).await;
                ExchangeOutcome::Acknowledged
            }
            ClientFrame::TextInput { text } => self.handle_text_input(&handle, &text).await,
        }
    }

    /// Run one exchange; the session stays locked throughout
    async fn handle_text_input(&self, handle: &ConnectionHandle, text: &str) -> ExchangeOutcome {
        let text = text.trim();
        if text.is_empty() {
            return ExchangeOutcome::Ignored;
        }

        let id = handle.id;
        let mut session = handle.session.lock().await;
        handle.send(ServerFrame::final_stt(text)).await;

        if self.safety.check(text).is_flagged() {
            info!(conn_id = %id, "Safety gate triggered, sending support message");
            let reply = self.safety.canned_reply();
            session.record_exchange(text, reply);
            handle.send(ServerFrame::persona_say(reply)).await;
            return ExchangeOutcome::Canned;
        }

        let persona = resolve_persona(
            self.personas.as_ref(),
            &session.persona_id,
            session.user_id.as_deref(),
        )
        .await;
        let turns: Vec<Turn> = session.build_turns(&persona, text);
        let sampling = self.backend.default_sampling();

        debug!(
            conn_id = %id,
            persona = %session.persona_id,
            turns = turns.len(),
            "Invoking backend"
        );

        match self
            .backend
            .generate(&persona.system_prompt, &turns, &sampling)
            .await
        {
            Ok(reply) => {
                session.record_exchange(text, &reply);
                handle.send(ServerFrame::persona_say(reply)).await;
                ExchangeOutcome::Generated
            }
            Err(e) => {
                warn!(conn_id = %id, kind = %e.kind(), error = %e, "Generation failed");
                handle.send(ServerFrame::error(e.user_message())).await;
                ExchangeOutcome::Failed
            }
        }
    }

    /// Release a connection's session
    ///
    /// Returns false if the connection was already closed.
    pub fn on_close(&self, id: ConnectionId) -> bool {
        match self.registry.unregister(&id) {
            Some(handle) => {
                handle.cancel_keepalive();
                match handle.session.try_lock() {
                    Ok(session) => info!(
                        conn_id = %id,
                        session_id = %session.id,
                        uptime_secs = handle.uptime_secs(),
                        active_secs = session.metadata.active_secs(),
                        exchanges = session.metadata.exchange_count,
                        "Connection closed"
                    ),
                    Err(_) => info!(
                        conn_id = %id,
                        uptime_secs = handle.uptime_secs(),
                        "Connection closed mid-exchange"
                    ),
                }
                true
            }
            None => false,
        }
    }

    /// Close every live session
    pub fn close_all(&self) -> usize {
        self.registry
            .connection_ids()
            .into_iter()
            .filter(|id| self.on_close(*id))
            .count()
    }

    /// Memory length for a connection
    pub async fn memory_len(&self, id: ConnectionId) -> Option<usize> {
        let handle = self.registry.get(&id)?;
        let session = handle.session.lock().await;
        Some(session.memory.len())
    }

    /// Snapshot of a connection's stored turns
    pub async fn memory_turns(&self, id: ConnectionId) -> Option<Vec<Turn>> {
        let handle = self.registry.get(&id)?;
        let session = handle.session.lock().await;
        Some(session.memory.turns().to_vec())
    }

    /// Active persona for a connection
    pub async fn persona_id(&self, id: ConnectionId) -> Option<String> {
        let handle = self.registry.get(&id)?;
        let session = handle.session.lock().await;
        Some(session.persona_id.clone())
    }

    /// Whether a connection's keepalive timer is running
    #[must_use]
    pub fn has_keepalive(&self, id: ConnectionId) -> bool {
        self.registry
            .get(&id)
            .is_some_and(|handle| handle.has_keepalive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ProviderError, SamplingConfig};
    use crate::persona::BuiltinPersonas;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct EchoBackend;

    #[async_trait]
    impl LlmBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        fn default_sampling(&self) -> SamplingConfig {
            SamplingConfig::local_default()
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            _system_prompt: &str,
            turns: &[Turn],
            _sampling: &SamplingConfig,
        ) -> Result<String, ProviderError> {
            Ok(format!("echo: {}", turns.last().map_or("", |t| t.content.as_str())))
        }
    }

    fn conductor() -> Conductor<EchoBackend> {
        Conductor::new(
            EchoBackend,
            Arc::new(BuiltinPersonas::new()),
            ConductorConfig::default(),
        )
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> ServerFrame {
        match rx.recv().await {
            Some(Outbound::Frame(frame)) => frame,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_sends_ready_and_provider() {
        let conductor = conductor();
        let (tx, mut rx) = mpsc::channel(16);
        let id = conductor.on_connect(tx, None).await;

        assert_eq!(next_frame(&mut rx).await, ServerFrame::Ready);
        assert_eq!(next_frame(&mut rx).await, ServerFrame::info("Provider: echo"));
        assert!(conductor.has_keepalive(id));
        assert_eq!(conductor.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_generated_exchange() {
        let conductor = conductor();
        let (tx, mut rx) = mpsc::channel(16);
        let id = conductor.on_connect(tx, None).await;
        next_frame(&mut rx).await;
        next_frame(&mut rx).await;

        let outcome = conductor
            .on_frame(id, r#"{"type":"text_input","text":"  hello  "}"#)
            .await;
        assert_eq!(outcome, ExchangeOutcome::Generated);
        assert_eq!(next_frame(&mut rx).await, ServerFrame::final_stt("hello"));
        assert_eq!(next_frame(&mut rx).await, ServerFrame::persona_say("echo: hello"));
        assert_eq!(conductor.memory_len(id).await, Some(2));
    }

    #[tokio::test]
    async fn test_blank_input_ignored() {
        let conductor = conductor();
        let (tx, _rx) = mpsc::channel(16);
        let id = conductor.on_connect(tx, None).await;

        let outcome = conductor
            .on_frame(id, r#"{"type":"text_input","text":"   "}"#)
            .await;
        assert_eq!(outcome, ExchangeOutcome::Ignored);
        assert_eq!(conductor.memory_len(id).await, Some(0));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conductor = conductor();
        let (tx, _rx) = mpsc::channel(16);
        let id = conductor.on_connect(tx, None).await;

        assert!(conductor.on_close(id));
        assert!(!conductor.on_close(id));
        assert!(!conductor.has_keepalive(id));
        assert_eq!(conductor.connection_count(), 0);
        assert_eq!(
            conductor.on_frame(id, r#"{"type":"reset"}"#).await,
            ExchangeOutcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ticks() {
        let conductor = conductor();
        let (tx, mut rx) = mpsc::channel(16);
        conductor.on_connect(tx, None).await;
        next_frame(&mut rx).await;
        next_frame(&mut rx).await;

        assert_eq!(rx.recv().await, Some(Outbound::Keepalive));
    }
}
