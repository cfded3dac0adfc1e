use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Frames that may wait for one websocket writer before the connection is
/// treated as stalled.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Result of queueing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The writer is gone.
    Closed,
    /// The writer has fallen `OUTBOUND_QUEUE_CAPACITY` frames behind.
    Full,
}

/// A frame queued for one websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Live handle to one websocket's outgoing queue.
///
/// The connection counts as open while its writer task still holds the
/// receiving end. The queue is bounded; a peer that stops reading fills it.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    sender: Sender<Outbound>,
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Connection {
    pub fn new(id: ConnectionId, sender: Sender<Outbound>) -> Self {
        Connection { id, sender }
    }

    /// Create a connection with a fresh id together with its outgoing queue.
    pub fn channel() -> (Self, Receiver<Outbound>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Connection::new(Uuid::new_v4(), tx), rx)
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a frame without waiting.
    pub fn deliver(&self, message: Outbound) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue a frame; returns `false` when it was not queued.
    pub fn send(&self, message: Outbound) -> bool {
        self.deliver(message) == Delivery::Queued
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Outbound::Text(text.into()))
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.send(Outbound::Close {
            code,
            reason: reason.into(),
        })
    }
}
