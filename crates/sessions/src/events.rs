//! Lifecycle event fan-out.
//!
//! Every status change, QR code, inbound message and session error is
//! published on the [`EventBus`].  The gateway subscribes once per control
//! connection and turns events into broadcasts.

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::model::SessionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        session_id: String,
        owner_id: String,
        status: SessionStatus,
        detail: Option<String>,
    },
    QrGenerated {
        session_id: String,
        owner_id: String,
        qr: String,
    },
    MessageReceived {
        session_id: String,
        owner_id: String,
        payload: Value,
        timestamp: i64,
    },
    Error {
        session_id: String,
        owner_id: String,
        error: String,
        code: Option<u16>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::StatusChanged { session_id, .. }
            | Self::QrGenerated { session_id, .. }
            | Self::MessageReceived { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// Unbounded multi-subscriber fan-out.  Closed subscribers are pruned on
/// the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
