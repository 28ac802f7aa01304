//! In-memory discovery adapter for tests.
//!
//! Streams are `tokio::io::duplex` pipes: the session gets one end, the test
//! keeps the other and plays the remote peer.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::discovery::{Capabilities, DiscoveryAdapter, DiscoveryError, DiscoveryEvent, PeerHandle};

/// Pipe buffer size for streams handed out by the mock.
pub const MOCK_PIPE_CAPACITY: usize = 64 * 1024;

/// Scriptable `DiscoveryAdapter`.
pub struct MockDiscovery {
    inner: Mutex<MockState>,
}

struct MockState {
    capabilities: Capabilities,
    display_name: String,
    discovering: bool,
    fail_start: Option<String>,
    start_calls: usize,
    stop_calls: usize,
    subscribe_calls: usize,
    subscriber: Option<mpsc::UnboundedSender<DiscoveryEvent<DuplexStream>>>,
    connect_results: VecDeque<Result<Option<DuplexStream>, DiscoveryError>>,
    peers: Result<Vec<PeerHandle>, DiscoveryError>,
}

impl Default for MockDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities {
            triggered: true,
            browse: true,
        })
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            inner: Mutex::new(MockState {
                capabilities,
                display_name: String::new(),
                discovering: false,
                fail_start: None,
                start_calls: 0,
                stop_calls: 0,
                subscribe_calls: 0,
                subscriber: None,
                connect_results: VecDeque::new(),
                peers: Ok(Vec::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver an event to the live subscriber. Returns false if nobody is subscribed.
    pub fn emit(&self, event: DiscoveryEvent<DuplexStream>) -> bool {
        let state = self.lock();
        match &state.subscriber {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate a completed tap: the session gets one end of a fresh pipe,
    /// the caller gets the other.
    pub fn complete_triggered(&self) -> Option<DuplexStream> {
        let (local, remote) = tokio::io::duplex(MOCK_PIPE_CAPACITY);
        if self.emit(DiscoveryEvent::Completed(local)) {
            Some(remote)
        } else {
            None
        }
    }

    /// Queue the outcome of the next `connect` call.
    pub fn push_connect_result(&self, result: Result<Option<DuplexStream>, DiscoveryError>) {
        self.lock().connect_results.push_back(result);
    }

    /// Queue a successful `connect` and return the remote end of its pipe.
    pub fn push_connect_pipe(&self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(MOCK_PIPE_CAPACITY);
        self.push_connect_result(Ok(Some(local)));
        remote
    }

    pub fn set_peers(&self, peers: Result<Vec<PeerHandle>, DiscoveryError>) {
        self.lock().peers = peers;
    }

    /// Make the next `start_discovery` fail with `reason`.
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.lock().fail_start = Some(reason.into());
    }

    pub fn display_name(&self) -> String {
        self.lock().display_name.clone()
    }

    pub fn is_discovering(&self) -> bool {
        self.lock().discovering
    }

    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Whether a subscriber is currently holding its receiver.
    pub fn has_subscriber(&self) -> bool {
        self.lock()
            .subscriber
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl DiscoveryAdapter for MockDiscovery {
    type Stream = DuplexStream;

    fn capabilities(&self) -> Capabilities {
        self.lock().capabilities
    }

    fn set_display_name(&self, name: &str) {
        self.lock().display_name = name.to_string();
    }

    fn start_discovery(&self) -> Result<(), DiscoveryError> {
        let mut state = self.lock();
        state.start_calls += 1;
        if let Some(reason) = state.fail_start.take() {
            return Err(DiscoveryError::Unavailable(reason));
        }
        state.discovering = true;
        Ok(())
    }

    fn stop_discovery(&self) {
        let mut state = self.lock();
        state.stop_calls += 1;
        state.discovering = false;
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent<DuplexStream>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.subscribe_calls += 1;
        state.subscriber = Some(tx);
        rx
    }

    fn connect(
        &self,
        _peer: &PeerHandle,
    ) -> impl Future<Output = Result<Option<DuplexStream>, DiscoveryError>> + Send {
        let result = self
            .lock()
            .connect_results
            .pop_front()
            .unwrap_or_else(|| Err(DiscoveryError::Connect("no scripted result".into())));
        async move { result }
    }

    fn enumerate_peers(
        &self,
    ) -> impl Future<Output = Result<Vec<PeerHandle>, DiscoveryError>> + Send {
        let peers = self.lock().peers.clone();
        async move { peers }
    }
}
