//! LAN discovery adapter: plain TCP for the stream, UDP for browsing.
//!
//! Triggered connections are inbound TCP accepts on `listen_addr`. Browsing
//! sends a JSON probe to every `browse_targets` address and collects the
//! announcements that come back within `browse_timeout`. Both sockets are
//! bound once in `bind`; starting and stopping discovery only spawns and
//! aborts the accept and responder tasks.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tapchat_session::{Capabilities, DiscoveryAdapter, DiscoveryError, DiscoveryEvent, PeerHandle};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const MAX_DATAGRAM: usize = 2048;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct LanConfig {
    /// TCP address accepting triggered connections.
    pub listen_addr: SocketAddr,
    /// UDP address answering browse probes.
    pub browse_addr: SocketAddr,
    /// Where `enumerate_peers` sends probes (broadcast or unicast).
    pub browse_targets: Vec<SocketAddr>,
    pub browse_timeout: Duration,
    pub connect_timeout: Duration,
    pub triggered: bool,
    pub browse: bool,
}

impl LanConfig {
    /// Ephemeral ports on 127.0.0.1, no probe targets.
    pub fn loopback() -> Self {
        let localhost = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            listen_addr: localhost,
            browse_addr: localhost,
            browse_targets: Vec::new(),
            browse_timeout: Duration::from_millis(300),
            connect_timeout: Duration::from_secs(2),
            triggered: true,
            browse: true,
        }
    }
}

/// Browse datagrams, JSON encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BrowseDatagram {
    Probe {
        instance: u64,
    },
    Announce {
        instance: u64,
        name: String,
        port: u16,
    },
}

type LanEvent = DiscoveryEvent<TcpStream>;

pub struct LanDiscovery {
    config: LanConfig,
    /// Random per-adapter id; probes and announcements carrying it are our own.
    instance: u64,
    listener: Arc<TcpListener>,
    responder: Option<Arc<UdpSocket>>,
    shared: Arc<Mutex<Shared>>,
}

struct Shared {
    display_name: String,
    subscriber: Option<mpsc::UnboundedSender<LanEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LanDiscovery {
    pub async fn bind(config: LanConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let responder = if config.browse {
            Some(Arc::new(UdpSocket::bind(config.browse_addr).await?))
        } else {
            None
        };

        let instance = rand::random::<u64>();
        tracing::info!(
            tcp = %listener.local_addr()?,
            udp = ?responder.as_ref().and_then(|s| s.local_addr().ok()),
            instance,
            "lan: sockets bound"
        );

        Ok(Self {
            config,
            instance,
            listener: Arc::new(listener),
            responder,
            shared: Arc::new(Mutex::new(Shared {
                display_name: String::new(),
                subscriber: None,
                tasks: Vec::new(),
            })),
        })
    }

    /// Address peers connect to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address answering browse probes, if browsing is enabled.
    pub fn browse_addr(&self) -> Option<SocketAddr> {
        self.responder.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn config(&self) -> &LanConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        for task in self.lock().tasks.drain(..) {
            task.abort();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deliver to the live subscriber. Returns false if the event was dropped.
fn emit(shared: &Mutex<Shared>, event: LanEvent) -> bool {
    match &lock(shared).subscriber {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

impl DiscoveryAdapter for LanDiscovery {
    type Stream = TcpStream;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            triggered: self.config.triggered,
            browse: self.config.browse,
        }
    }

    fn set_display_name(&self, name: &str) {
        self.lock().display_name = name.to_string();
    }

    fn start_discovery(&self) -> Result<(), DiscoveryError> {
        if !self.capabilities().any() {
            return Err(DiscoveryError::Unavailable(
                "triggered and browse discovery are both disabled".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;
        let port = self
            .listener
            .local_addr()
            .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?
            .port();

        let mut tasks = Vec::new();
        if self.config.triggered {
            tasks.push(runtime.spawn(accept_loop(
                self.listener.clone(),
                self.shared.clone(),
            )));
        }
        if let Some(socket) = &self.responder {
            tasks.push(runtime.spawn(respond_loop(
                socket.clone(),
                self.instance,
                port,
                self.shared.clone(),
            )));
        }

        let stale = std::mem::replace(&mut self.lock().tasks, tasks);
        for task in stale {
            task.abort();
        }

        tracing::info!(port, "lan: discovery started");
        if self.config.triggered {
            emit(&self.shared, DiscoveryEvent::Listening);
        }
        Ok(())
    }

    fn stop_discovery(&self) {
        let tasks: Vec<_> = self.lock().tasks.drain(..).collect();
        if !tasks.is_empty() {
            tracing::info!("lan: discovery stopped");
        }
        for task in tasks {
            task.abort();
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<LanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscriber = Some(tx);
        rx
    }

    fn connect(
        &self,
        peer: &PeerHandle,
    ) -> impl Future<Output = Result<Option<TcpStream>, DiscoveryError>> + Send {
        let addr = peer.id.clone();
        let timeout = self.config.connect_timeout;
        async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(addr.as_str()))
                .await
                .map_err(|_| DiscoveryError::Connect(format!("{addr}: timed out")))?
                .map_err(|e| DiscoveryError::Connect(format!("{addr}: {e}")))?;
            let _ = stream.set_nodelay(true);
            tracing::info!(%addr, "lan: connected to peer");
            Ok(Some(stream))
        }
    }

    fn enumerate_peers(
        &self,
    ) -> impl Future<Output = Result<Vec<PeerHandle>, DiscoveryError>> + Send {
        let enabled = self.config.browse;
        let targets = self.config.browse_targets.clone();
        let timeout = self.config.browse_timeout;
        let instance = self.instance;
        async move {
            if !enabled {
                return Err(DiscoveryError::Unavailable("browse is disabled".into()));
            }
            browse(instance, &targets, timeout)
                .await
                .map_err(|e| DiscoveryError::Enumerate(e.to_string()))
        }
    }
}

async fn accept_loop(listener: Arc<TcpListener>, shared: Arc<Mutex<Shared>>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::info!(%addr, "lan: inbound connection");
                let _ = stream.set_nodelay(true);
                emit(&shared, DiscoveryEvent::PeerFound);
                if !emit(&shared, DiscoveryEvent::Completed(stream)) {
                    tracing::debug!(%addr, "lan: nobody subscribed, dropping connection");
                }
            }
            Err(e) => {
                tracing::warn!("lan: accept error: {e}");
                emit(&shared, DiscoveryEvent::Failed(e.to_string()));
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn respond_loop(socket: Arc<UdpSocket>, instance: u64, port: u16, shared: Arc<Mutex<Shared>>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                // ICMP errors from earlier sends surface here on some platforms
                tracing::debug!("lan: responder recv error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        match serde_json::from_slice::<BrowseDatagram>(&buf[..n]) {
            Ok(BrowseDatagram::Probe { instance: theirs }) if theirs != instance => {
                let name = lock(&shared).display_name.clone();
                let announce = BrowseDatagram::Announce {
                    instance,
                    name,
                    port,
                };
                match serde_json::to_vec(&announce) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, from).await {
                            tracing::debug!(%from, "lan: announce failed: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("lan: encode announce: {e}"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(%from, "lan: ignoring malformed datagram: {e}"),
        }
    }
}

/// Probe `targets` and collect announcements until `timeout` elapses.
///
/// Announcements from `instance` itself are skipped and repeated answers from
/// the same address collapse to one handle.
pub async fn browse(
    instance: u64,
    targets: &[SocketAddr],
    timeout: Duration,
) -> io::Result<Vec<PeerHandle>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let probe = serde_json::to_vec(&BrowseDatagram::Probe { instance }).map_err(io::Error::other)?;
    let mut sent = 0;
    for target in targets {
        match socket.send_to(&probe, target).await {
            Ok(_) => sent += 1,
            Err(e) => tracing::warn!(%target, "lan: probe failed: {e}"),
        }
    }
    if sent == 0 && !targets.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no browse target accepted the probe",
        ));
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut peers: Vec<PeerHandle> = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::debug!("lan: browse recv error: {e}");
                continue;
            }
            Ok(Ok(v)) => v,
        };

        if let Ok(BrowseDatagram::Announce {
            instance: theirs,
            name,
            port,
        }) = serde_json::from_slice(&buf[..n])
        {
            if theirs == instance {
                continue;
            }
            let id = SocketAddr::new(from.ip(), port).to_string();
            if !peers.iter().any(|p| p.id == id) {
                tracing::debug!(%id, %name, "lan: peer announced");
                peers.push(PeerHandle::new(id, name));
            }
        }
    }

    tracing::info!(found = peers.len(), "lan: browse finished");
    Ok(peers)
}
