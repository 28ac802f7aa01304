//! Session task -- owns the state machine, the discovery subscription and the
//! peer stream.
//!
//! Everything that mutates state runs on one task:
//!   1. commands from `SessionHandle`s (start, stop, search, send, ...)
//!   2. discovery events from the adapter subscription
//!   3. results from helper tasks (reader, writer, connect, search)
//!
//! Helper tasks tag their results with the stream generation or the stop
//! epoch they were started under; stale results are dropped.

use std::sync::Arc;

use tapchat_protocol::{
    Frame, FrameReader, FrameWriter, FramedChannel, Message, Opcode, ProtocolError,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::discovery::{Capabilities, DiscoveryAdapter, DiscoveryError, DiscoveryEvent, PeerHandle};
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionSnapshot};
use crate::state::{Generation, SessionState, SessionStatus};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from handles to the session task.
enum SessionCommand {
    Start { reply: Reply<()> },
    Stop { reply: oneshot::Sender<()> },
    Disconnect { reply: oneshot::Sender<()> },
    Search { reply: Reply<Vec<PeerHandle>> },
    ConnectToPeer { peer: PeerHandle, reply: Reply<()> },
    SendMessage { text: String, reply: Reply<()> },
}

/// Results flowing back from helper tasks.
enum Internal<S> {
    Frame {
        generation: Generation,
        frame: Frame,
    },
    ReadFailed {
        generation: Generation,
        error: ProtocolError,
    },
    WriteFailed {
        generation: Generation,
        reason: String,
    },
    SearchDone {
        epoch: u64,
        result: Result<Vec<PeerHandle>, DiscoveryError>,
        reply: Reply<Vec<PeerHandle>>,
    },
    ConnectDone {
        epoch: u64,
        peer: PeerHandle,
        result: Result<Option<S>, DiscoveryError>,
        reply: Reply<()>,
    },
}

/// One frame queued for the writer task.
struct Outgoing {
    frame: Frame,
    reply: Option<Reply<()>>,
}

/// The live stream: queue into the writer plus both I/O tasks.
struct Link {
    generation: Generation,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Abort both halves. Dropping the last half closes the stream; queued
    /// sends resolve as `NotConnected`.
    fn close(self) {
        self.reader.abort();
        self.writer.abort();
        tracing::debug!(generation = self.generation, "session: link closed");
    }
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    capabilities: Capabilities,
}

impl SessionHandle {
    /// Begin discovery. Fails with `InvalidState` unless idle.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Start { reply }).await?
    }

    /// Stop discovery and close any stream. Idempotent.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    /// Close the current stream and go back to listening for a new peer.
    /// No-op unless connected.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply }).await
    }

    /// One-shot browse for nearby peers.
    pub async fn search(&self) -> Result<Vec<PeerHandle>, SessionError> {
        self.request(|reply| SessionCommand::Search { reply }).await?
    }

    /// Open a stream to a peer returned by `search`.
    pub async fn connect_to_peer(&self, peer: PeerHandle) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::ConnectToPeer { peer, reply })
            .await?
    }

    /// Send one chat line. Empty text writes nothing.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::SendMessage { text, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        // The writer drops the reply if the link is torn down mid-send
        rx.await.unwrap_or(Err(SessionError::NotConnected))
    }

    /// Subscribe to session events.
    ///
    /// Receivers that fall more than `event_buffer` events behind get
    /// `RecvError::Lagged` and lose the oldest events. After a lag, read
    /// `snapshot()` to resynchronise: it always reflects the latest state,
    /// including a stream interruption whose event was skipped.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.snapshot.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().is_connected()
    }

    pub fn peer_name(&self) -> String {
        self.snapshot.borrow().peer_name.clone()
    }

    pub fn peers(&self) -> Vec<PeerHandle> {
        self.snapshot.borrow().peers.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Spawn the session task on the current runtime.
///
/// The task runs until every `SessionHandle` has been dropped, then stops
/// discovery and closes the stream.
pub fn spawn_session<D: DiscoveryAdapter>(
    adapter: Arc<D>,
    config: SessionConfig,
) -> (SessionHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let handle = SessionHandle {
        commands: cmd_tx,
        events: event_tx.clone(),
        snapshot: snapshot_rx,
        capabilities: adapter.capabilities(),
    };

    let session = Session {
        adapter,
        config,
        state: SessionState::new(),
        subscription: None,
        link: None,
        epoch: 0,
        commands: cmd_rx,
        internal_tx,
        internal_rx,
        events: event_tx,
        snapshot: snapshot_tx,
    };

    let task = tokio::spawn(session.run());
    (handle, task)
}

struct Session<D: DiscoveryAdapter> {
    adapter: Arc<D>,
    config: SessionConfig,
    state: SessionState,
    subscription: Option<mpsc::UnboundedReceiver<DiscoveryEvent<D::Stream>>>,
    link: Option<Link>,
    /// Bumped by `stop`; pending connect/search results from older epochs are discarded.
    epoch: u64,
    commands: mpsc::Receiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<Internal<D::Stream>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<D::Stream>>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<D: DiscoveryAdapter> Session<D> {
    async fn run(mut self) {
        tracing::debug!(name = %self.config.display_name, "session: task started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                Some(msg) = self.internal_rx.recv() => {
                    self.handle_internal(msg);
                }
                event = next_discovery_event(&mut self.subscription) => {
                    match event {
                        Some(event) => self.handle_discovery(event),
                        None => {
                            tracing::warn!("session: discovery adapter closed its event stream");
                            self.subscription = None;
                        }
                    }
                }
            }
        }

        self.teardown();
        tracing::debug!("session: all handles dropped, task exiting");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start { reply } => {
                let _ = reply.send(self.start());
            }
            SessionCommand::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            SessionCommand::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            SessionCommand::Search { reply } => self.search(reply),
            SessionCommand::ConnectToPeer { peer, reply } => self.connect_to_peer(peer, reply),
            SessionCommand::SendMessage { text, reply } => self.send_message(text, reply),
        }
    }

    fn start(&mut self) -> Result<(), SessionError> {
        self.state.start()?;

        self.adapter.set_display_name(&self.config.display_name);
        self.resubscribe();

        if let Err(e) = self.adapter.start_discovery() {
            tracing::warn!(error = %e, "session: discovery failed to start");
            self.subscription = None;
            self.state.stop();
            self.publish();
            return Err(e.into());
        }

        tracing::info!(name = %self.config.display_name, "session: discovery started");
        self.publish();
        Ok(())
    }

    fn stop(&mut self) {
        self.epoch += 1;
        self.teardown();
        let from = self.state.stop();
        if from != SessionStatus::Idle {
            tracing::info!(from = from.name(), "session: stopped");
        }
        self.publish();
    }

    fn disconnect(&mut self) {
        if !self.state.disconnect() {
            tracing::debug!(status = %self.state.status(), "session: disconnect ignored");
            return;
        }

        if let Some(link) = self.link.take() {
            link.close();
        }

        self.resubscribe();
        if let Err(e) = self.adapter.start_discovery() {
            tracing::warn!(error = %e, "session: discovery failed to restart");
            self.emit(SessionEvent::ConnectivityProblem(e.to_string()));
        }

        tracing::info!("session: disconnected, listening for a new peer");
        self.publish();
    }

    fn search(&mut self, reply: Reply<Vec<PeerHandle>>) {
        if let Err(e) = self.state.require_started("search") {
            let _ = reply.send(Err(e));
            return;
        }
        if !self.adapter.capabilities().browse {
            let _ = reply.send(Err(SessionError::Unsupported("browse")));
            return;
        }

        self.emit(SessionEvent::Searching);

        let adapter = self.adapter.clone();
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = adapter.enumerate_peers().await;
            let _ = internal.send(Internal::SearchDone {
                epoch,
                result,
                reply,
            });
        });
    }

    fn connect_to_peer(&mut self, peer: PeerHandle, reply: Reply<()>) {
        if let Err(e) = self.state.require_started("connect_to_peer") {
            let _ = reply.send(Err(e));
            return;
        }

        tracing::info!(peer = %peer.id, name = %peer.display_name, "session: connecting to peer");
        self.emit(SessionEvent::Connecting);

        let adapter = self.adapter.clone();
        let internal = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = adapter.connect(&peer).await;
            let _ = internal.send(Internal::ConnectDone {
                epoch,
                peer,
                result,
                reply,
            });
        });
    }

    fn send_message(&mut self, text: String, reply: Reply<()>) {
        let link = match &self.link {
            Some(link) if self.state.can_send() => link,
            _ => {
                let _ = reply.send(Err(SessionError::NotConnected));
                return;
            }
        };

        if text.is_empty() {
            let _ = reply.send(Ok(()));
            return;
        }

        let outgoing = Outgoing {
            frame: Frame::chat(text),
            reply: Some(reply),
        };
        if let Err(mpsc::error::SendError(outgoing)) = link.outgoing.send(outgoing) {
            if let Some(reply) = outgoing.reply {
                let _ = reply.send(Err(SessionError::NotConnected));
            }
        }
    }

    // ========================================================================
    // Discovery events
    // ========================================================================

    fn handle_discovery(&mut self, event: DiscoveryEvent<D::Stream>) {
        tracing::debug!(event = event.name(), status = %self.state.status(), "session: discovery event");

        match event {
            DiscoveryEvent::PeerFound => {
                self.emit(SessionEvent::Connecting);
            }
            DiscoveryEvent::Connecting => {
                self.state.mark_connecting();
                self.publish();
            }
            DiscoveryEvent::Listening => {
                self.state.mark_listening();
                self.publish();
            }
            DiscoveryEvent::Completed(stream) => {
                tracing::info!("session: triggered connection completed");
                self.adopt_stream(stream);
            }
            DiscoveryEvent::Canceled => {
                self.emit(SessionEvent::ConnectivityProblem("connection canceled".into()));
            }
            DiscoveryEvent::Failed(reason) => {
                tracing::warn!(%reason, "session: triggered connection failed");
                self.emit(SessionEvent::ConnectivityProblem(reason));
            }
        }
    }

    /// Post-connect sequence shared by triggered and browse connections.
    fn adopt_stream(&mut self, stream: D::Stream) {
        // Exactly one peer: discovery and any previous stream go first
        self.subscription = None;
        self.adapter.stop_discovery();
        if let Some(link) = self.link.take() {
            link.close();
        }

        let generation = self.state.adopt_link();
        let (reader, writer) = FramedChannel::new(stream).into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(run_reader(generation, reader, self.internal_tx.clone()));
        let writer = tokio::spawn(run_writer(
            generation,
            writer,
            out_rx,
            self.internal_tx.clone(),
        ));

        let _ = out_tx.send(Outgoing {
            frame: Frame::name(self.config.display_name.clone()),
            reply: None,
        });

        self.link = Some(Link {
            generation,
            outgoing: out_tx,
            reader,
            writer,
        });

        tracing::info!(generation, "session: connected");
        self.publish();
        self.emit(SessionEvent::Connected);
    }

    // ========================================================================
    // Helper task results
    // ========================================================================

    fn handle_internal(&mut self, msg: Internal<D::Stream>) {
        match msg {
            Internal::Frame { generation, frame } => self.handle_frame(generation, frame),
            Internal::ReadFailed { generation, error } => {
                if self.state.mark_interrupted(generation) {
                    tracing::warn!(generation, error = %error, "session: read loop ended");
                    self.publish();
                    self.emit(SessionEvent::ConnectionInterrupted(error.to_string()));
                }
            }
            Internal::WriteFailed { generation, reason } => {
                if self.state.mark_interrupted(generation) {
                    tracing::warn!(generation, %reason, "session: write failed");
                    self.publish();
                    self.emit(SessionEvent::ConnectionInterrupted(reason));
                }
            }
            Internal::SearchDone {
                epoch,
                result,
                reply,
            } => {
                if epoch != self.epoch {
                    let _ = reply.send(Err(SessionError::Canceled));
                    return;
                }
                match result {
                    Ok(peers) => {
                        tracing::info!(count = peers.len(), "session: search finished");
                        self.state.set_peers(peers.clone());
                        self.publish();
                        self.emit(SessionEvent::SearchFinished(peers.clone()));
                        let _ = reply.send(Ok(peers));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "session: search failed");
                        self.emit(SessionEvent::ConnectivityProblem(e.to_string()));
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            Internal::ConnectDone {
                epoch,
                peer,
                result,
                reply,
            } => {
                if epoch != self.epoch {
                    tracing::debug!(peer = %peer.id, "session: dropping connect result after stop");
                    let _ = reply.send(Err(SessionError::Canceled));
                    return;
                }
                match result {
                    Ok(Some(stream)) => {
                        self.adopt_stream(stream);
                        let _ = reply.send(Ok(()));
                    }
                    Ok(None) => {
                        tracing::warn!(peer = %peer.id, "session: connect returned no stream");
                        let e = DiscoveryError::Connect(format!("{} returned no stream", peer.id));
                        self.emit(SessionEvent::ConnectivityProblem(e.to_string()));
                        let _ = reply.send(Err(e.into()));
                    }
                    Err(e) => {
                        tracing::warn!(peer = %peer.id, error = %e, "session: connect failed");
                        self.emit(SessionEvent::ConnectivityProblem(e.to_string()));
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, generation: Generation, frame: Frame) {
        if !self.state.is_current(generation) {
            return;
        }

        match frame.kind() {
            Some(Opcode::Name) => {
                if self.state.set_peer_name(generation, &frame.text) {
                    tracing::info!(peer_name = %frame.text, "session: peer name learned");
                    self.publish();
                    self.emit(SessionEvent::PeerNameChanged(frame.text));
                }
            }
            Some(Opcode::Chat) => {
                let message = Message::incoming(self.state.peer_name(), frame.text);
                self.emit(SessionEvent::MessageReceived(message));
            }
            None => {
                tracing::debug!(opcode = frame.opcode, "session: skipping unknown opcode");
            }
        }
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Drop any existing subscription before taking a new one so the adapter
    /// never delivers the same event twice.
    fn resubscribe(&mut self) {
        self.subscription = None;
        self.subscription = Some(self.adapter.subscribe());
    }

    fn teardown(&mut self) {
        self.adapter.stop_discovery();
        self.subscription = None;
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            status: self.state.status(),
            peer_name: self.state.peer_name().to_string(),
            peers: self.state.peers().to_vec(),
            interrupted: self.state.is_interrupted(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(event = event.name(), "session: event");
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

async fn next_discovery_event<S>(
    subscription: &mut Option<mpsc::UnboundedReceiver<DiscoveryEvent<S>>>,
) -> Option<DiscoveryEvent<S>> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read loop: one task per stream, ends on the first failure.
async fn run_reader<R, S>(
    generation: Generation,
    mut reader: FrameReader<R>,
    internal: mpsc::UnboundedSender<Internal<S>>,
) where
    R: AsyncRead + Unpin,
{
    let error = loop {
        match reader.read_frame().await {
            Ok(frame) => {
                if internal.send(Internal::Frame { generation, frame }).is_err() {
                    return;
                }
            }
            Err(e) => break e,
        }
    };

    let _ = internal.send(Internal::ReadFailed { generation, error });
}

/// Writer: drains the queue in order, flushing each frame.
async fn run_writer<W, S>(
    generation: Generation,
    mut writer: FrameWriter<W>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    internal: mpsc::UnboundedSender<Internal<S>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(Outgoing { frame, reply }) = queue.recv().await {
        match writer.send(frame).await {
            Ok(()) => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e.into()));
                }
                let _ = internal.send(Internal::WriteFailed { generation, reason });
                return;
            }
        }
    }
}
