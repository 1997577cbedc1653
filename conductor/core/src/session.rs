//! Session Management
//!
//! One [`Session`] per live connection: the active persona, the bounded
//! conversation memory, and a little metadata for logging.
//!
//! # Design Philosophy
//!
//! Sessions live only as long as their connection. Nothing here is
//! persisted, and nothing is shared with other connections; the registry
//! owns each session and the conductor mutates it one exchange at a time.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::memory::{ConversationMemory, Turn};
use crate::persona::{PersonaContext, DEFAULT_PERSONA_ID};

/// Unique identifier for a session
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    ///
    /// Uses an atomic counter combined with timestamp to ensure uniqueness
    /// even when multiple sessions are created in the same millisecond.
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("session_{}_{count}", now_ms()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the session was created (Unix timestamp ms)
    pub created_at: u64,
    /// When the session was last active (Unix timestamp ms)
    pub last_active_at: u64,
    /// Completed exchanges, canned or generated
    pub exchange_count: u32,
}

impl SessionMetadata {
    fn new() -> Self {
        let now = now_ms();
        Self {
            created_at: now,
            last_active_at: now,
            exchange_count: 0,
        }
    }

    /// Update last active timestamp
    pub fn touch(&mut self) {
        self.last_active_at = now_ms();
    }

    /// Seconds between creation and the last activity
    #[must_use]
    pub fn active_secs(&self) -> u64 {
        self.last_active_at.saturating_sub(self.created_at) / 1000
    }
}

/// Per-connection conversation state
#[derive(Clone, Debug)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Active persona id
    pub persona_id: String,
    /// Caller-supplied user id, forwarded to persona lookup only
    pub user_id: Option<String>,
    /// Bounded turn log
    pub memory: ConversationMemory,
    /// Session metadata
    pub metadata: SessionMetadata,
}

impl Session {
    /// Create a session with the default persona and empty memory
    #[must_use]
    pub fn new(user_id: Option<String>, memory_cap: usize) -> Self {
        Self {
            id: SessionId::new(),
            persona_id: DEFAULT_PERSONA_ID.to_string(),
            user_id,
            memory: ConversationMemory::with_cap(memory_cap),
            metadata: SessionMetadata::new(),
        }
    }

    /// Switch persona for future requests
    ///
    /// Blank or missing ids reset to the default. Stored memory is untouched.
    /// Returns the persona now in effect.
    pub fn set_persona(&mut self, persona: Option<&str>) -> &str {
        self.persona_id = match persona.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => DEFAULT_PERSONA_ID.to_string(),
        };
        self.metadata.touch();
        &self.persona_id
    }

    /// Clear conversation memory
    pub fn reset_memory(&mut self) {
        self.memory.clear();
        self.metadata.touch();
    }

    /// Record a completed exchange
    pub fn record_exchange(&mut self, user_text: &str, reply: &str) {
        self.memory
            .append(Turn::user(user_text), Turn::assistant(reply));
        self.metadata.exchange_count = self.metadata.exchange_count.saturating_add(1);
        self.metadata.touch();
    }

    /// Ordered turns for a generation call: few-shot, then memory, then the new input
    #[must_use]
    pub fn build_turns(&self, persona: &PersonaContext, user_text: &str) -> Vec<Turn> {
        let mut turns =
            Vec::with_capacity(persona.few_shot_examples.len() + self.memory.len() + 1);
        turns.extend(persona.few_shot_examples.iter().cloned());
        turns.extend(self.memory.turns().iter().cloned());
        turns.push(Turn::user(user_text));
        turns
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
