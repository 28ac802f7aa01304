//! Peer discovery adapter -- the host-supplied proximity capability.
//!
//! The session never opens sockets or scans for devices itself. It drives an
//! adapter through this trait and reacts to the events it reports.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Opaque handle to a device found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    /// Adapter-specific address (for the LAN adapter, `host:port`).
    pub id: String,
    /// Name advertised by the device during discovery.
    pub display_name: String,
}

impl PeerHandle {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Which discovery strategies the adapter supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Tap / inbound-triggered connections.
    pub triggered: bool,
    /// One-shot browse for nearby peers.
    pub browse: bool,
}

impl Capabilities {
    pub fn any(&self) -> bool {
        self.triggered || self.browse
    }
}

/// Progress of a triggered connection, as reported by the adapter.
#[derive(Debug)]
pub enum DiscoveryEvent<S> {
    PeerFound,
    Connecting,
    Listening,
    Completed(S),
    Canceled,
    Failed(String),
}

impl<S> DiscoveryEvent<S> {
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryEvent::PeerFound => "peer_found",
            DiscoveryEvent::Connecting => "connecting",
            DiscoveryEvent::Listening => "listening",
            DiscoveryEvent::Completed(_) => "completed",
            DiscoveryEvent::Canceled => "canceled",
            DiscoveryEvent::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery unavailable: {0}")]
    Unavailable(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("peer enumeration failed: {0}")]
    Enumerate(String),
}

/// Host proximity capability consumed by the session.
///
/// `subscribe` hands out a fresh event receiver; dropping the receiver is the
/// unsubscribe. The session keeps at most one receiver alive at a time.
pub trait DiscoveryAdapter: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn capabilities(&self) -> Capabilities;

    fn set_display_name(&self, name: &str);

    fn start_discovery(&self) -> Result<(), DiscoveryError>;

    fn stop_discovery(&self);

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent<Self::Stream>>;

    /// Open a stream to `peer`. `Ok(None)` means the platform resolved the
    /// attempt without producing a socket.
    fn connect(
        &self,
        peer: &PeerHandle,
    ) -> impl Future<Output = Result<Option<Self::Stream>, DiscoveryError>> + Send;

    fn enumerate_peers(
        &self,
    ) -> impl Future<Output = Result<Vec<PeerHandle>, DiscoveryError>> + Send;
}
