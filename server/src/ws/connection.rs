use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// The connection's writer task owns the receiving half and the socket sink.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Identifies one registered socket, so cleanup for a superseded socket can
/// tell itself apart from its replacement.
pub type ConnectionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("peer connection is closed")]
    Closed,
    #[error("peer is not reading; outbound queue is full")]
    Full,
}

/// One live client channel. Sends never block: implementations queue the
/// frame or report the peer as gone.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn send(&self, text: &str) -> Result<(), ConnectionError>;

    fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError>;
}

/// [`Connection`] backed by the bounded channel feeding a socket's writer task.
///
/// A full queue means the peer stopped reading: the send fails and the
/// socket's serve loop is told to shut down.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: ConnectionSender,
    shutdown: Arc<Notify>,
}

impl ChannelConnection {
    pub fn new(tx: ConnectionSender, shutdown: Arc<Notify>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
            shutdown,
        }
    }

    fn queue(&self, msg: Message) -> Result<(), ConnectionError> {
        self.tx.try_send(msg).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                self.shutdown.notify_one();
                ConnectionError::Full
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.queue(Message::Text(text.into()))
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.queue(Message::Close(Some(frame)))
    }
}
