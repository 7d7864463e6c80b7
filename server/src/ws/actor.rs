use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, timeout};

use crate::auth::Identity;
use crate::state::AppState;
use crate::ws::connection::{ChannelConnection, Connection, ConnectionId};
use crate::ws::protocol::{self, Flow};
use crate::ws::registry::ConnectionRegistry;

/// Releases a registration when the serve loop exits, on every path
/// including unwinding.
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    identity_id: String,
    room_id: String,
    connection_id: ConnectionId,
}

impl RegistrationGuard {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        identity_id: &str,
        room_id: &str,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            registry,
            identity_id: identity_id.to_string(),
            room_id: room_id.to_string(),
            connection_id,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let released = self
            .registry
            .release(&self.identity_id, &self.room_id, self.connection_id);
        tracing::debug!(
            user_id = %self.identity_id,
            room_id = %self.room_id,
            released = released.is_some(),
            "Registration released"
        );
    }
}

/// Run the actor-per-connection pattern for an authenticated, authorized socket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes text frames and hands them to the protocol layer
///
/// The registry holds a [`ChannelConnection`] wrapping the same channel, so
/// broadcasts from any task end up in this socket's writer.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity, room_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.ws.send_queue_capacity.max(1));
    // Fired by the writer on exit, by the ping task on pong timeout and by
    // the registry's handle when the peer stops draining its queue
    let shutdown = Arc::new(Notify::new());

    let connection = Arc::new(ChannelConnection::new(tx.clone(), shutdown.clone()));
    let connection_id = connection.id();

    // Spawn writer first so the join announcements queued by connect flush immediately
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, shutdown.clone()));

    let outcome = state
        .registry
        .connect(connection, identity.clone(), &room_id);
    let guard = RegistrationGuard::new(state.registry.clone(), &identity.id, &room_id, connection_id);

    tracing::info!(
        user_id = %identity.id,
        room_id = %room_id,
        superseded = outcome.superseded,
        "WebSocket actor started"
    );

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_interval = Duration::from_secs(state.ws.ping_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(state.ws.pong_timeout_secs.max(1));
    let ping_tx = tx.clone();
    let ping_shutdown = shutdown.clone();
    let ping_user = identity.id.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            match ping_tx.try_send(Message::Ping(vec![1, 2, 3, 4].into())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(user_id = %ping_user, "Outbound queue full, closing connection");
                    ping_shutdown.notify_one();
                    break;
                }
                // Writer task has died, connection is gone
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(user_id = %ping_user, "Pong timeout, closing connection");
                    let _ = ping_tx.try_send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    ping_shutdown.notify_one();
                    break;
                }
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = shutdown.notified() => {
                tracing::info!(
                    user_id = %identity.id,
                    room_id = %room_id,
                    "Server closed connection"
                );
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let flow = protocol::handle_text_frame(
                        text.as_str(),
                        &state.engine,
                        &identity,
                        &room_id,
                        state.ws.max_message_chars,
                    );
                    if flow == Flow::Leave {
                        let _ = tx.try_send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "Left room".into(),
                        })));
                        break;
                    }
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %identity.id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %identity.id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %identity.id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %identity.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Unregister before tearing down so user_left goes out while the writer can still flush a close
    drop(guard);
    ping_handle.abort();
    drop(tx);
    // Writer exits once every sender (ours and the registry's) is gone; a
    // peer that stopped reading can leave it blocked on the sink
    if timeout(Duration::from_secs(1), &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %identity.id,
        room_id = %room_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Signals `shutdown` on exit so the serve loop stops waiting on the peer.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    shutdown: Arc<Notify>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
    shutdown.notify_one();
}
