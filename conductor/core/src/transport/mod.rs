//! Transport Layer
//!
//! Moves JSON text frames between clients and the [`crate::Conductor`]:
//! - `frame`: the text-frame codec and its [`ProtocolError`]
//! - `websocket`: the WebSocket server (feature `websocket`, on by default)
//!
//! # Design Philosophy
//!
//! The Conductor never touches a socket. It consumes raw frame text and
//! produces [`crate::registry::Outbound`] items, so the same session logic
//! runs behind a real socket or a test channel.

pub mod frame;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use frame::{ProtocolError, DEFAULT_MAX_FRAME_BYTES};
#[cfg(feature = "websocket")]
pub use websocket::{serve, BUSY_MESSAGE, INBOUND_QUEUE};
