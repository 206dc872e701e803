use parking_lot::Mutex;

use tandem_core::models::{Connection, ConnectionRequest, DisconnectReason};
use tandem_core::UserId;

/// A committed lifecycle transition. Emitted after the store transaction
/// succeeds, exactly once per transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    RequestCreated {
        request: ConnectionRequest,
        target_user_id: UserId,
    },
    RequestRejected {
        request: ConnectionRequest,
        rejected_by: UserId,
    },
    ConnectionEstablished {
        connection: Connection,
        request: ConnectionRequest,
    },
    ConnectionEnded {
        connection: Connection,
        reason: DisconnectReason,
        ended_by: UserId,
    },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request_created",
            Self::RequestRejected { .. } => "request_rejected",
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::ConnectionEnded { .. } => "connection_ended",
        }
    }
}

/// Notified synchronously on every committed transition. Implementations
/// must not block.
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

/// Keeps every event it sees. Useful in tests and for diagnostics.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(LifecycleEvent::kind).collect()
    }
}

impl LifecycleListener for RecordingListener {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events.lock().push(event.clone());
    }
}
