//! Notifications raised by the session and the observable snapshot.

use serde::Serialize;
use tapchat_protocol::Message;

use crate::discovery::PeerHandle;
use crate::state::SessionStatus;

/// Asynchronous notification delivered to every `SessionHandle::events` receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer was found or a connect attempt began.
    Connecting,
    /// A stream was adopted and the local name queued.
    Connected,
    /// Discovery or a connect attempt failed; state is unchanged.
    ConnectivityProblem(String),
    /// The live stream failed. Raised at most once per connection.
    ConnectionInterrupted(String),
    Searching,
    SearchFinished(Vec<PeerHandle>),
    MessageReceived(Message),
    PeerNameChanged(String),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connecting => "connecting",
            SessionEvent::Connected => "connected",
            SessionEvent::ConnectivityProblem(_) => "connectivity_problem",
            SessionEvent::ConnectionInterrupted(_) => "connection_interrupted",
            SessionEvent::Searching => "searching",
            SessionEvent::SearchFinished(_) => "search_finished",
            SessionEvent::MessageReceived(_) => "message_received",
            SessionEvent::PeerNameChanged(_) => "peer_name_changed",
        }
    }
}

/// Read-only view of the session, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub peer_name: String,
    pub peers: Vec<PeerHandle>,
    /// The current stream failed and the session is waiting for `disconnect`.
    pub interrupted: bool,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            peer_name: String::new(),
            peers: Vec::new(),
            interrupted: false,
        }
    }
}
