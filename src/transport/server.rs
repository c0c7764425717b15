//! Inbound WebSocket transport.
//!
//! [`WsServer`] listens on the bind address, upgrades every TCP connection to
//! a WebSocket, and reports it as [`TransportEvent::Opened`]. Admission is
//! decided by the connection manager; the server accepts everyone and lets the
//! manager reject with [`Transport::reject`].
//!
//! # Connection Flow
//!
//! 1. Accept loop takes a TCP connection
//! 2. WebSocket upgrade (`accept_async`)
//! 3. Peer registered, `Opened` queued, socket task spawned
//! 4. Manager admits (`ClientJoined`) or rejects (close 1013)

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::connection::{PeerHandle, run_peer};
use super::{CloseReason, EVENT_QUEUE_CAPACITY, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Live peers by ID, shared with the accept loop.
type PeerMap = Arc<RwLock<FxHashMap<PeerId, PeerHandle>>>;

// ============================================================================
// WsServer
// ============================================================================

/// Listening WebSocket transport for server role.
///
/// # Example
///
/// ```ignore
/// let server = WsServer::bind("0.0.0.0:81".parse()?).await?;
/// println!("Listening on {}", server.ws_url());
/// let manager = ConnectionManager::server(Box::new(server), &config);
/// ```
pub struct WsServer {
    /// Address actually bound.
    local_addr: SocketAddr,
    /// Live peers.
    peers: PeerMap,
    /// Events from the accept loop and peer tasks.
    events: mpsc::Receiver<TransportEvent>,
    /// Stops the accept loop.
    shutdown: Arc<AtomicBool>,
}

// ============================================================================
// WsServer - Constructor
// ============================================================================

impl WsServer {
    /// Binds the listener and starts the accept loop.
    ///
    /// Use port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let peers: PeerMap = Arc::new(RwLock::new(FxHashMap::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            events_tx,
            Arc::clone(&shutdown),
        ));

        info!(%local_addr, "WebSocket server listening");

        Ok(Self {
            local_addr,
            peers,
            events,
            shutdown,
        })
    }
}

// ============================================================================
// WsServer - Public API
// ============================================================================

impl WsServer {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns a loopback URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port())
    }

    /// Returns the number of open peers, admitted or not.
    #[inline]
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Stops accepting and closes every peer.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let peers: Vec<_> = self.peers.write().drain().collect();
        for (peer, handle) in peers {
            handle.close(None);
            debug!(%peer, "Peer closed during shutdown");
        }

        info!("WebSocket server shut down");
    }

    fn handle(&self, peer: PeerId) -> Result<PeerHandle> {
        self.peers
            .read()
            .get(&peer)
            .cloned()
            .ok_or_else(|| Error::peer_not_found(peer))
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// WsServer - Transport
// ============================================================================

impl Transport for WsServer {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        if let TransportEvent::Closed { peer } = &event {
            self.peers.write().remove(peer);
        }
        Some(event)
    }

    fn send_text(&mut self, peer: PeerId, text: &str) -> Result<()> {
        self.handle(peer)?.send_text(text)
    }

    fn ping(&mut self, peer: PeerId) -> Result<()> {
        self.handle(peer)?.ping()
    }

    fn close(&mut self, peer: PeerId) {
        if let Some(handle) = self.peers.write().remove(&peer) {
            handle.close(None);
        }
    }

    fn reject(&mut self, peer: PeerId, reason: CloseReason) {
        if let Some(handle) = self.peers.write().remove(&peer) {
            handle.close(Some(reason));
        }
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Background task that accepts new connections.
async fn accept_loop(
    listener: TcpListener,
    peers: PeerMap,
    events: mpsc::Sender<TransportEvent>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Accept loop started");

    loop {
        if shutdown.load(Ordering::SeqCst) || events.is_closed() {
            debug!("Accept loop shutting down");
            break;
        }

        // Accept with timeout to allow checking shutdown flag
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                let peers = Arc::clone(&peers);
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, peers, events).await {
                        warn!(error = %e, %addr, "Connection handling failed");
                    }
                });
            }
            Ok(Err(e)) => {
                error!(error = %e, "Accept failed");
            }
            Err(_) => continue,
        }
    }

    debug!("Accept loop terminated");
}

/// Upgrades one TCP connection and hands it to a peer task.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peers: PeerMap,
    events: mpsc::Sender<TransportEvent>,
) -> Result<()> {
    debug!(%addr, "New TCP connection");

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;

    let peer = PeerId::next();
    let (handle, commands) = PeerHandle::channel(peer);

    // Registered before `Opened` so the manager can answer right away
    peers.write().insert(peer, handle);

    if events
        .send(TransportEvent::Opened {
            peer,
            remote: Some(addr),
        })
        .await
        .is_err()
    {
        peers.write().remove(&peer);
        return Err(Error::ConnectionClosed);
    }

    debug!(%peer, %addr, "WebSocket connection established");

    run_peer(peer, ws_stream, commands, events).await;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
