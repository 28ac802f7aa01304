use tapchat_protocol::ProtocolError;

use crate::discovery::DiscoveryError;
use crate::state::SessionStatus;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation invoked in a status that forbids it. A caller bug, not a runtime condition.
    #[error("{op} not allowed while {status}")]
    InvalidState {
        op: &'static str,
        status: SessionStatus,
    },
    #[error("not connected")]
    NotConnected,
    #[error("adapter does not support {0} discovery")]
    Unsupported(&'static str),
    #[error("canceled by stop")]
    Canceled,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session task has shut down")]
    Closed,
}

impl SessionError {
    pub fn is_misuse(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}
