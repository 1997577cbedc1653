//! WebSocket Transport
//!
//! Accepts client connections and wires each one to the [`Conductor`].
//!
//! # Per-connection tasks
//!
//! ```text
//!   socket ──► reader ──(mpsc)──► worker ──► Conductor::on_frame
//!                                                │
//!   socket ◄── writer ◄──(mpsc Outbound)◄────────┘  (+ keepalive pings)
//! ```
//!
//! The worker handles one frame at a time, so exchanges on a connection
//! complete in arrival order. When the reader stops, the worker is aborted
//! (dropping any in-flight backend request) and the session is released.
//!
//! Worker and writer live in a per-connection [`JoinSet`], so aborting the
//! connection task during server shutdown aborts both of them as well.
//!
//! The reader never waits on a full inbound queue: excess frames are
//! rejected with an `error` frame so a client Close is always observed.
//!
//! # Security
//!
//! There is no authentication here. The `?user=` query parameter is
//! untrusted and only used to pick user-scoped persona files.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::frame;
use crate::backend::LlmBackend;
use crate::conductor::Conductor;
use crate::messages::ServerFrame;
use crate::registry::Outbound;

/// Outbound frames buffered per connection
const OUTBOUND_QUEUE: usize = 64;

/// Inbound frames buffered per connection
pub const INBOUND_QUEUE: usize = 32;

/// Sent when a frame arrives while the inbound queue is full
pub const BUSY_MESSAGE: &str = "Too many pending messages; please wait for a reply";

/// Serve WebSocket clients until `shutdown` resolves
///
/// On shutdown the accept loop stops, open connections are dropped and
/// their sessions released.
pub async fn serve<B, F>(
    listener: TcpListener,
    conductor: Arc<Conductor<B>>,
    shutdown: F,
) -> anyhow::Result<()>
where
    B: LlmBackend + 'static,
    F: Future<Output = ()> + Send,
{
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!(addr = %local_addr, provider = %conductor.backend().name(), "WebSocket server listening");

    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested, closing listener");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conductor = Arc::clone(&conductor);
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, conductor).await {
                            debug!(peer = %peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.abort_all();
    while connections.join_next().await.is_some() {}

    let closed = conductor.close_all();
    info!(closed, "WebSocket server stopped");
    Ok(())
}

async fn handle_connection<B: LlmBackend + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    conductor: Arc<Conductor<B>>,
) -> anyhow::Result<()> {
    let mut user_id = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            user_id = user_from_uri(&request.uri().to_string());
            Ok(response)
        },
    )
    .await
    .with_context(|| format!("WebSocket handshake with {peer} failed"))?;

    let (mut sink, mut source) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let (in_tx, mut in_rx) = mpsc::channel::<String>(INBOUND_QUEUE);

    let overflow_tx = out_tx.clone();
    let id = conductor.on_connect(out_tx, user_id).await;
    debug!(conn_id = %id, peer = %peer, "WebSocket connection accepted");

    // Dropped with this future, aborting both tasks
    let mut tasks = JoinSet::new();

    let writer = tasks.spawn(async move {
        while let Some(item) = out_rx.recv().await {
            let message = match item {
                Outbound::Frame(server_frame) => match frame::encode(&server_frame) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!(error = %e, "Dropping unencodable frame");
                        continue;
                    }
                },
                Outbound::Keepalive => Message::Ping(Vec::new()),
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let worker_conductor = Arc::clone(&conductor);
    let worker = tasks.spawn(async move {
        while let Some(raw) = in_rx.recv().await {
            worker_conductor.on_frame(id, &raw).await;
        }
    });

    let mut result = Ok(());
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match in_tx.try_send(text) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = %id, "Inbound queue full, rejecting frame");
                    let busy = Outbound::Frame(ServerFrame::error(BUSY_MESSAGE));
                    let _ = overflow_tx.try_send(busy);
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Ok(Message::Binary(data)) => {
                debug!(conn_id = %id, len = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                result = Err(anyhow::Error::new(e).context(format!("read error on {id}")));
                break;
            }
        }
    }

    worker.abort();
    conductor.on_close(id);
    writer.abort();
    drop(overflow_tx);
    tasks.shutdown().await;
    result
}

/// Extract a non-blank `user` query parameter from a request target
fn user_from_uri(target: &str) -> Option<String> {
    let base = reqwest::Url::parse("ws://localhost/").ok()?;
    let url = base.join(target).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_uri() {
        assert_eq!(user_from_uri("/?user=alice"), Some("alice".to_string()));
        assert_eq!(
            user_from_uri("/ws?foo=1&user=bob%20smith"),
            Some("bob smith".to_string())
        );
        assert_eq!(user_from_uri("/?user=%20"), None);
        assert_eq!(user_from_uri("/"), None);
    }
}
