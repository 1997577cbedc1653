//! Frame Protocol
//!
//! Text-frame codec for client/server messages: one JSON object per frame.
//!
//! # Decoding rules
//!
//! - Oversized or unparsable frames are [`ProtocolError`]s, answered with an
//!   `error` frame.
//! - An object whose `type` is missing or unrecognized decodes to `None` and
//!   is ignored without a reply.
//! - A recognized `type` with badly typed fields is a [`ProtocolError`].
//!
//! # Security
//!
//! The size limit is checked before any parsing happens.

use serde_json::Value;

use crate::messages::{ClientFrame, ServerFrame};

/// Default maximum inbound frame size (64 KiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Malformed inbound frame
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured limit
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Received size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Not valid JSON, or not a JSON object
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Known type with invalid fields
    #[error("Invalid {frame_type} frame: {message}")]
    InvalidFields {
        /// Declared type
        frame_type: String,
        /// Parser message
        message: String,
    },

    /// Outbound serialization failed
    #[error("Failed to encode {frame_type} frame: {message}")]
    Encode {
        /// Frame type being encoded
        frame_type: &'static str,
        /// Serializer message
        message: String,
    },
}

/// Decode one inbound text frame
///
/// Returns `Ok(None)` for frames with no recognized `type`.
pub fn decode(raw: &str, max_bytes: usize) -> Result<Option<ClientFrame>, ProtocolError> {
    if raw.len() > max_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: raw.len(),
            max: max_bytes,
        });
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(ref object) = value else {
        return Err(ProtocolError::Malformed(
            "expected a JSON object".to_string(),
        ));
    };

    let frame_type = match object.get("type").and_then(Value::as_str) {
        Some(t) if ClientFrame::KNOWN_TYPES.contains(&t) => t.to_string(),
        _ => return Ok(None),
    };

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ProtocolError::InvalidFields {
            frame_type,
            message: e.to_string(),
        })
}

/// Encode one outbound frame as JSON text
pub fn encode(frame: &ServerFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode {
        frame_type: frame.type_name(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_frames() {
        let frame = decode(r#"{"type":"text_input","text":"hi"}"#, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(
            frame,
            Ok(Some(ClientFrame::TextInput {
                text: "hi".to_string()
            }))
        );

        let frame = decode(r#"{"type":"reset","extra":1}"#, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(frame, Ok(Some(ClientFrame::Reset)));
    }

    #[test]
    fn test_unknown_or_missing_type_is_ignored() {
        assert_eq!(decode(r#"{"type":"audio_chunk"}"#, 1024), Ok(None));
        assert_eq!(decode(r#"{"text":"hi"}"#, 1024), Ok(None));
        assert_eq!(decode(r#"{"type":42}"#, 1024), Ok(None));
    }

    #[test]
    fn test_malformed_json() {
        let err = tokio_test::assert_err!(decode("{not json", 1024));
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(err.to_string().starts_with("Malformed frame:"));

        let err = decode("[1,2,3]", 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_wrong_field_type() {
        let err = decode(r#"{"type":"text_input","text":7}"#, 1024).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidFields { ref frame_type, .. } if frame_type == "text_input"
        ));
    }

    #[test]
    fn test_size_limit() {
        let raw = format!(r#"{{"type":"text_input","text":"{}"}}"#, "a".repeat(200));
        let err = decode(&raw, 100).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FrameTooLarge {
                size: raw.len(),
                max: 100
            }
        );
    }

    #[test]
    fn test_encode() {
        let text = encode(&ServerFrame::Ready).unwrap();
        assert_eq!(text, r#"{"type":"ready"}"#);
    }
}
