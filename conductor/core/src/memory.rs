//! Conversation Memory
//!
//! Bounded, ordered log of the turns exchanged in one session. Turns are
//! appended in user/assistant pairs and the oldest pairs are dropped first
//! once the cap is exceeded, so the retained history is always a suffix of
//! the conversation and always starts with a user turn.

use serde::{Deserialize, Serialize};

/// Default number of turns retained per session
pub const DEFAULT_MEMORY_CAP: usize = 20;

/// Who produced a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The connected client
    User,
    /// The persona (generated or canned reply)
    Assistant,
}

impl Role {
    /// Wire name used by chat-style backends
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Turn {
    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-session turn log with a hard length cap
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    cap: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::with_cap(DEFAULT_MEMORY_CAP)
    }
}

impl ConversationMemory {
    /// Create an empty memory holding at most `cap` turns
    ///
    /// A cap below 2 could never hold a complete exchange, so it is raised to 2.
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            turns: Vec::new(),
            cap: cap.max(2),
        }
    }

    /// Append one exchange, dropping the oldest pairs if the cap is exceeded
    pub fn append(&mut self, user: Turn, assistant: Turn) {
        debug_assert_eq!(user.role, Role::User);
        debug_assert_eq!(assistant.role, Role::Assistant);

        self.turns.push(user);
        self.turns.push(assistant);

        if self.turns.len() > self.cap {
            // Round the excess up to a whole pair so the log still opens on a user turn
            let excess = self.turns.len() - self.cap;
            let drop = excess + (excess % 2);
            self.turns.drain(..drop);
        }
    }

    /// Remove every stored turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Stored turns, oldest first
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of stored turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the memory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Maximum number of turns retained
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_append_keeps_order() {
        let mut memory = ConversationMemory::default();
        memory.append(Turn::user("hi"), Turn::assistant("hello"));
        memory.append(Turn::user("how are you"), Turn::assistant("well"));

        let contents: Vec<&str> = memory.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello", "how are you", "well"]);
    }

    #[test]
    fn test_cap_never_exceeded() {
        let mut memory = ConversationMemory::default();
        for i in 0..50 {
            memory.append(
                Turn::user(format!("u{i}")),
                Turn::assistant(format!("a{i}")),
            );
            assert!(memory.len() <= DEFAULT_MEMORY_CAP);
        }

        // The 10 most recent exchanges survive, oldest first
        assert_eq!(memory.len(), 20);
        assert_eq!(memory.turns()[0], Turn::user("u40"));
        assert_eq!(memory.turns()[1], Turn::assistant("a40"));
        assert_eq!(memory.turns()[19], Turn::assistant("a49"));
    }

    #[test]
    fn test_odd_cap_preserves_pairing() {
        let mut memory = ConversationMemory::with_cap(5);
        for i in 0..4 {
            memory.append(
                Turn::user(format!("u{i}")),
                Turn::assistant(format!("a{i}")),
            );
        }

        assert_eq!(memory.len(), 4);
        assert_eq!(memory.turns()[0].role, Role::User);
        assert_eq!(memory.turns()[0].content, "u2");
    }

    #[test]
    fn test_tiny_cap_is_raised() {
        let mut memory = ConversationMemory::with_cap(0);
        assert_eq!(memory.cap(), 2);

        memory.append(Turn::user("a"), Turn::assistant("b"));
        memory.append(Turn::user("c"), Turn::assistant("d"));
        assert_eq!(memory.turns(), &[Turn::user("c"), Turn::assistant("d")]);
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::default();
        memory.append(Turn::user("hi"), Turn::assistant("hello"));
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.len(), 0);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Turn::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }
}
