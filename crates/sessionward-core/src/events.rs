//! Session lifecycle notifications for observers (UI, navigation).
//!
//! Every event is sent only after the store reflects it, so an observer
//! reacting to `Expired` never sees the old session.

use tokio::sync::broadcast;
use tracing::debug;

use crate::refresh::TerminalReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { subject_id: String },
    Refreshed { subject_id: String },
    /// The session was cleared because it can no longer be refreshed.
    Expired { reason: TerminalReason },
    /// Remote validation rejected the session; it has been cleared.
    ValidationFailed,
    SignedOut,
}

#[derive(Clone)]
pub(crate) struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        debug!(?event, receivers = self.tx.receiver_count(), "Session event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
