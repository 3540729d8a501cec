//! Connection Acceptor
//!
//! Accepts peers on a Unix socket and optionally on TCP. Each peer becomes an
//! unfiltered subscription in the hub's registry whose handler forwards
//! messages onto that peer's bounded outbound queue.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use herald_broker::{ConnectionState, Subscriber, SubscriberError, SubscriptionId};
use herald_protocol::{actions, CodecError, Message, MessageCodec};
use herald_utils::{HeraldError, Result};

use crate::config::ListenConfig;
use crate::gate::AccessGate;
use crate::hub::Hub;

/// Registry handler standing in for one remote peer
pub struct PeerForwarder {
    peer: SubscriptionId,
    queue: mpsc::Sender<Message>,
    gate: Arc<dyn AccessGate>,
}

impl Subscriber for PeerForwarder {
    fn deliver(&self, message: &Message) -> std::result::Result<(), SubscriberError> {
        if !self.gate.may_receive(self.peer, &message.action) {
            debug!(peer = %self.peer, action = %message.action, "Forward skipped by gate");
            return Ok(());
        }

        match self.queue.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubscriberError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubscriberError::Closed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    /// Terminal
    Disconnected,
}

/// One accepted peer's membership in the hub
///
/// Registered on creation; `close` (or drop) unregisters it and tells the
/// remaining subscribers.
pub struct PeerConnection {
    id: SubscriptionId,
    state: PeerState,
    hub: Arc<Hub>,
}

impl PeerConnection {
    /// Register a peer whose outbound frames go to `queue`, then announce it
    /// to everyone else.
    pub fn open(hub: Arc<Hub>, queue: mpsc::Sender<Message>) -> Self {
        let gate = Arc::clone(hub.gate());
        let id = hub.registry().subscribe_with(
            |peer| {
                let forwarder: Arc<dyn Subscriber> = Arc::new(PeerForwarder { peer, queue, gate });
                forwarder
            },
            None,
        );

        info!(peer = %id, "Peer connected");
        hub.announce(actions::CONNECT, id, Some(id));

        Self {
            id,
            state: PeerState::Connected,
            hub,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Returns `false` if already closed
    pub fn close(&mut self) -> bool {
        if self.state == PeerState::Disconnected {
            return false;
        }
        self.state = PeerState::Disconnected;

        self.hub.unsubscribe(self.id, None);
        self.hub.announce(actions::DISCONNECT, self.id, None);
        info!(peer = %self.id, "Peer disconnected");
        true
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serve one peer until it hangs up, errors, or the hub shuts down
pub async fn handle_peer<S>(stream: S, hub: Arc<Hub>, remote: String)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let codec = MessageCodec::with_max_frame_size(hub.config().peers.max_frame_bytes);
    let mut frames = FramedRead::new(reader, codec);
    let mut sink = FramedWrite::new(writer, codec);

    let mut shutdown_rx = hub.subscribe_shutdown();
    if hub.is_shut_down() {
        debug!(%remote, "Hub already shut down, refusing peer");
        return;
    }

    let (tx, mut rx) = mpsc::channel(hub.config().peers.outbound_buffer.max(1));
    let mut peer = PeerConnection::open(Arc::clone(&hub), tx);
    let id = peer.id();
    debug!(peer = %id, %remote, "Peer session started");

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(raw)) => {
                    hub.dispatch_from(id, raw);
                }
                Some(Err(e)) => {
                    warn!(peer = %id, error = %e, "Read failed, closing peer");
                    break;
                }
                None => {
                    debug!(peer = %id, "Peer hung up");
                    break;
                }
            },
            outbound = rx.recv() => match outbound {
                Some(message) => match sink.send(message).await {
                    Ok(()) => {}
                    Err(CodecError::FrameTooLarge { size, max }) => {
                        warn!(peer = %id, size, max, "Outbound frame too large, dropped");
                    }
                    Err(e) => {
                        warn!(peer = %id, error = %e, "Write failed, closing peer");
                        break;
                    }
                },
                None => break,
            },
            _ = shutdown_rx.recv() => {
                debug!(peer = %id, "Shutdown, closing peer");
                break;
            }
        }
    }

    peer.close();
}

/// Bound but not yet accepting listeners
pub struct Listeners {
    unix: Option<(UnixListener, PathBuf)>,
    tcp: Option<TcpListener>,
}

impl Listeners {
    pub async fn bind(config: &ListenConfig) -> Result<Self> {
        let unix = match &config.socket_path {
            Some(path) => Some((bind_unix(path)?, path.clone())),
            None => None,
        };

        let tcp = match &config.tcp_addr {
            Some(addr) => {
                let listener =
                    TcpListener::bind(addr)
                        .await
                        .map_err(|source| HeraldError::Bind {
                            addr: addr.clone(),
                            source,
                        })?;
                Some(listener)
            }
            None => None,
        };

        if unix.is_none() && tcp.is_none() {
            return Err(HeraldError::config("no listener configured"));
        }

        Ok(Self { unix, tcp })
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.unix.as_ref().map(|(_, path)| path.as_path())
    }

    /// Actual TCP address, useful when bound to port 0
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }
}

fn bind_unix(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| HeraldError::FileWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if path.exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(HeraldError::Bind {
                addr: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "another server is listening",
                ),
            });
        }
        debug!(path = %path.display(), "Removing stale socket");
        std::fs::remove_file(path).map_err(|source| HeraldError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
    }

    UnixListener::bind(path).map_err(|source| HeraldError::Bind {
        addr: path.display().to_string(),
        source,
    })
}

/// Accept on every bound listener until [`Hub::shutdown`]
pub async fn serve(hub: Arc<Hub>, listeners: Listeners) {
    // Every receiver exists before the flag check, so none can miss the signal
    let mut shutdown_rx = hub.subscribe_shutdown();
    let tcp_shutdown = hub.subscribe_shutdown();
    let unix_shutdown = hub.subscribe_shutdown();

    if hub.is_shut_down() {
        if let Some((_, path)) = listeners.unix {
            let _ = std::fs::remove_file(path);
        }
        info!("Hub already shut down, not serving");
        return;
    }

    hub.set_state(ConnectionState::Connected);

    let mut loops = Vec::new();
    if let Some(listener) = listeners.tcp {
        loops.push(tokio::spawn(run_tcp_accept_loop(
            listener,
            Arc::clone(&hub),
            tcp_shutdown,
        )));
    }

    if let Some((listener, path)) = listeners.unix {
        loops.push(tokio::spawn(run_unix_accept_loop(
            listener,
            path,
            Arc::clone(&hub),
            unix_shutdown,
        )));
    }

    let _ = shutdown_rx.recv().await;
    hub.set_state(ConnectionState::Disconnected);

    for task in loops {
        if let Err(e) = task.await {
            error!("Accept loop panicked: {}", e);
        }
    }
    info!("Hub stopped accepting");
}

/// Run the Unix socket accept loop; removes the socket file on exit
pub async fn run_unix_accept_loop(
    listener: UnixListener,
    path: PathBuf,
    hub: Arc<Hub>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("Unix listener bound to {}", path.display());

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        debug!("New Unix connection");
                        let hub = Arc::clone(&hub);
                        tokio::spawn(handle_peer(stream, hub, "unix".to_string()));
                    }
                    Err(e) => {
                        error!("Unix accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping Unix accept loop");
                break;
            }
        }
    }

    if let Err(e) = std::fs::remove_file(&path) {
        warn!("Failed to remove socket {}: {}", path.display(), e);
    }
}

/// Run the TCP accept loop
pub async fn run_tcp_accept_loop(
    listener: TcpListener,
    hub: Arc<Hub>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("TCP listener bound to {}", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New TCP connection from {}", peer_addr);
                        let hub = Arc::clone(&hub);
                        tokio::spawn(handle_peer(stream, hub, peer_addr.to_string()));
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping TCP accept loop");
                break;
            }
        }
    }
}
