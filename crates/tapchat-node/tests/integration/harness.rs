//! Test harness for in-process tapchat nodes.
//!
//! Provides TestNode (one session on a loopback `LanDiscovery`) and
//! `connected_pair` for tests that start from an established chat.

use std::sync::Arc;
use std::time::Duration;

use tapchat_node::{LanConfig, LanDiscovery};
use tapchat_session::{
    spawn_session, PeerHandle, SessionConfig, SessionEvent, SessionHandle, SessionStatus,
};
use tokio::sync::broadcast::{self, error::RecvError};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running session with its own loopback sockets.
pub struct TestNode {
    pub name: String,
    pub session: SessionHandle,
    pub adapter: Arc<LanDiscovery>,
    events: broadcast::Receiver<SessionEvent>,
    _task: tokio::task::JoinHandle<()>,
}

#[allow(dead_code)]
impl TestNode {
    pub async fn start(name: &str) -> Self {
        Self::start_with(name, LanConfig::loopback()).await
    }

    pub async fn start_with(name: &str, config: LanConfig) -> Self {
        let adapter = Arc::new(
            LanDiscovery::bind(config)
                .await
                .expect("bind loopback sockets"),
        );
        let (session, task) = spawn_session(adapter.clone(), SessionConfig::new(name));
        let events = session.events();
        session.start().await.expect("start session");

        Self {
            name: name.to_string(),
            session,
            adapter,
            events,
            _task: task,
        }
    }

    /// What another node would get from browsing for this one.
    pub fn peer_handle(&self) -> PeerHandle {
        let addr = self.adapter.local_addr().expect("listener address");
        PeerHandle::new(addr.to_string(), &self.name)
    }

    /// Wait for the first event matching `pred`, skipping others.
    pub async fn expect_event(
        &mut self,
        what: &str,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> anyhow::Result<SessionEvent> {
        let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => anyhow::bail!("{}: timeout waiting for {what}", self.name),
                Ok(Ok(event)) if pred(&event) => return Ok(event),
                Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => {
                    anyhow::bail!("{}: event stream closed waiting for {what}", self.name)
                }
            }
        }
    }

    /// Fail if an event matching `pred` shows up within `window`.
    pub async fn expect_no_event(
        &mut self,
        what: &str,
        window: Duration,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) | Ok(Err(RecvError::Closed)) => return Ok(()),
                Ok(Ok(event)) if pred(&event) => {
                    anyhow::bail!("{}: unexpected {what}: {event:?}", self.name)
                }
                Ok(_) => continue,
            }
        }
    }

    pub async fn expect_message(&mut self, text: &str) -> anyhow::Result<tapchat_protocol::Message> {
        match self
            .expect_event("message", |e| {
                matches!(e, SessionEvent::MessageReceived(m) if m.text == text)
            })
            .await?
        {
            SessionEvent::MessageReceived(message) => Ok(message),
            other => anyhow::bail!("unexpected event {other:?}"),
        }
    }

    pub async fn wait_status(&self, status: SessionStatus) -> anyhow::Result<()> {
        let mut watch = self.session.watch();
        tokio::time::timeout(EVENT_TIMEOUT, watch.wait_for(|s| s.status == status))
            .await
            .map_err(|_| anyhow::anyhow!("{}: timeout waiting for {status}", self.name))?
            .map_err(|_| anyhow::anyhow!("{}: session task gone", self.name))?;
        Ok(())
    }

    pub async fn wait_peer_name(&mut self, name: &str) -> anyhow::Result<()> {
        self.expect_event("peer name", |e| {
            matches!(e, SessionEvent::PeerNameChanged(n) if n == name)
        })
        .await?;
        Ok(())
    }
}

/// `bob` connects to `alice`'s listener; both have learned each other's name.
pub async fn connected_pair() -> anyhow::Result<(TestNode, TestNode)> {
    let mut alice = TestNode::start("Alice").await;
    let mut bob = TestNode::start("Bob").await;

    bob.session.connect_to_peer(alice.peer_handle()).await?;
    alice.wait_status(SessionStatus::Connected).await?;

    alice.wait_peer_name("Bob").await?;
    bob.wait_peer_name("Alice").await?;
    Ok((alice, bob))
}
