//! Wire Messages
//!
//! JSON frames exchanged with a connected client. Each WebSocket text frame
//! carries exactly one object tagged by its `type` field.
//!
//! # Design Philosophy
//!
//! The client is a pure renderer: it shows what the server tells it and
//! sends raw user intent back. All decisions (safety, persona, provider)
//! happen server-side, so the vocabulary here is deliberately small.

use serde::{Deserialize, Serialize};

/// Speaker tag on every generated or canned reply
pub const PERSONA_SPEAKER: &str = "thera";

/// Frames sent by the client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A user utterance
    TextInput {
        /// Raw input text (missing means empty)
        #[serde(default)]
        text: String,
    },

    /// Switch persona for future requests
    SetPersona {
        /// Persona id; empty or missing resets to the default
        #[serde(default)]
        persona: Option<String>,
    },

    /// Clear conversation memory
    Reset,
}

impl ClientFrame {
    /// Wire names of every frame type the server understands
    pub const KNOWN_TYPES: &'static [&'static str] = &["text_input", "set_persona", "reset"];
}

/// Frames sent by the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session is ready for input
    Ready,

    /// Informational notice
    Info {
        /// Notice text
        message: String,
    },

    /// Something went wrong; the session stays usable
    Error {
        /// Human-readable description
        message: String,
    },

    /// Echo of the accepted input
    FinalStt {
        /// Input text as processed
        text: String,
    },

    /// Reply from the persona
    PersonaSay {
        /// Speaker tag, always [`PERSONA_SPEAKER`]
        who: String,
        /// Reply text
        text: String,
    },
}

impl ServerFrame {
    /// Informational notice
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    /// Error notice
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Input echo
    pub fn final_stt(text: impl Into<String>) -> Self {
        Self::FinalStt { text: text.into() }
    }

    /// Persona reply
    pub fn persona_say(text: impl Into<String>) -> Self {
        Self::PersonaSay {
            who: PERSONA_SPEAKER.to_string(),
            text: text.into(),
        }
    }

    /// Wire name of this frame's type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Info { .. } => "info",
            Self::Error { .. } => "error",
            Self::FinalStt { .. } => "final_stt",
            Self::PersonaSay { .. } => "persona_say",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_server_frame_wire_shape() {
        assert_eq!(
            serde_json::to_value(ServerFrame::Ready).unwrap(),
            json!({"type": "ready"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::persona_say("Hello")).unwrap(),
            json!({"type": "persona_say", "who": "thera", "text": "Hello"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::final_stt("hi")).unwrap(),
            json!({"type": "final_stt", "text": "hi"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::info("Memory cleared")).unwrap(),
            json!({"type": "info", "message": "Memory cleared"})
        );
    }

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"text_input","text":"hello"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::TextInput {
                text: "hello".to_string()
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"text_input"}"#).unwrap();
        assert_eq!(frame, ClientFrame::TextInput { text: String::new() });

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Reset);

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"set_persona"}"#).unwrap();
        assert_eq!(frame, ClientFrame::SetPersona { persona: None });
    }

    #[test]
    fn test_type_names_match_serde() {
        for frame in [
            ServerFrame::Ready,
            ServerFrame::info("x"),
            ServerFrame::error("x"),
            ServerFrame::final_stt("x"),
            ServerFrame::persona_say("x"),
        ] {
            let value = serde_json::to_value(&frame).unwrap();
            assert_eq!(value["type"], frame.type_name());
        }
    }
}
