//! Connection Registry
//!
//! Tracks every live client connection and the session it owns.
//!
//! # Architecture
//!
//! ```text
//!                     ┌───────────────────────────────────────┐
//!                     │          ConnectionRegistry           │
//!                     │ DashMap<ConnectionId, ConnectionHandle>│
//!                     └───────────────┬───────────────────────┘
//!                                     │
//!              ┌──────────────────────┼──────────────────────┐
//!              │                      │                      │
//!       ┌──────▼──────┐       ┌───────▼──────┐       ┌───────▼──────┐
//!       │   conn-1    │       │    conn-2    │       │    conn-3    │
//!       │ session+tx  │       │  session+tx  │       │  session+tx  │
//!       └─────────────┘       └──────────────┘       └──────────────┘
//! ```
//!
//! # Thread Safety
//!
//! The map is sharded (`dashmap`), so connections on different tasks never
//! contend on one lock. Each session sits behind its own async mutex which
//! is held for a whole exchange.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::messages::ServerFrame;
use crate::session::Session;

/// Unique identifier for a client connection
///
/// Each connection is assigned a unique ID when it connects.
/// This ID is stable for the lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new unique connection ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Item queued for a connection's writer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A protocol frame
    Frame(ServerFrame),
    /// Liveness ping (a WebSocket Ping on the wire)
    Keepalive,
}

/// Everything the server holds for one connection
pub struct ConnectionHandle {
    /// Connection identifier
    pub id: ConnectionId,
    /// Session state, locked for the duration of an exchange
    pub session: Arc<tokio::sync::Mutex<Session>>,
    tx: mpsc::Sender<Outbound>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    connected_at: Instant,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Create a handle around a fresh session
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>, session: Session) -> Self {
        Self {
            id,
            session: Arc::new(tokio::sync::Mutex::new(session)),
            tx,
            keepalive: Mutex::new(None),
            connected_at: Instant::now(),
        }
    }

    /// Send a frame to this connection
    ///
    /// Returns true if the frame was queued.
    pub async fn send(&self, frame: ServerFrame) -> bool {
        self.tx.send(Outbound::Frame(frame)).await.is_ok()
    }

    /// Check if the connection's writer is still alive
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Seconds since the connection opened
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.connected_at.elapsed().as_secs()
    }

    /// Clone of the outbound sender, for the keepalive task
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Outbound> {
        self.tx.clone()
    }

    /// Install the keepalive task, aborting any previous one
    pub fn set_keepalive(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.keepalive.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the keepalive task
    ///
    /// Returns true only on the call that actually cancelled it.
    pub fn cancel_keepalive(&self) -> bool {
        match self.keepalive.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a keepalive task is installed
    #[must_use]
    pub fn has_keepalive(&self) -> bool {
        self.keepalive.lock().is_some()
    }
}

/// Registry of live connections
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection
    pub fn register(&self, handle: ConnectionHandle) -> Arc<ConnectionHandle> {
        let id = handle.id;
        let handle = Arc::new(handle);
        self.inner.insert(id, Arc::clone(&handle));
        tracing::debug!(conn_id = %id, "Connection registered");
        handle
    }

    /// Remove a connection
    ///
    /// Returns the handle if it was registered.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let handle = self.inner.remove(id).map(|(_, handle)| handle);
        if handle.is_some() {
            tracing::debug!(conn_id = %id, "Connection unregistered");
        }
        handle
    }

    /// Look up a connection
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.inner.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of live connections
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Check if a connection is registered
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.contains_key(id)
    }

    /// IDs of all live connections
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.iter().map(|entry| *entry.key()).collect()
    }
}
