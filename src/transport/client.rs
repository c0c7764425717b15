//! Outbound WebSocket transport.
//!
//! [`WsClient`] dials the upstream URL on request. The handshake runs in a
//! background task bounded by the connect timeout, so [`Transport::connect`]
//! returns immediately. The outcome arrives on the event queue.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::connection::{PeerHandle, run_peer};
use super::{CloseReason, EVENT_QUEUE_CAPACITY, Transport, TransportEvent};

// ============================================================================
// WsClient
// ============================================================================

/// Dialing WebSocket transport for client role.
///
/// Holds at most one live upstream connection. Starting a new attempt drops
/// whatever connection was there before.
pub struct WsClient {
    /// Upstream endpoint.
    url: Url,
    /// Limit on one handshake.
    connect_timeout: Duration,
    /// Latest attempt and, once its handshake completes, its connection.
    upstream: Arc<Mutex<Upstream>>,
    /// Sending side handed to connection tasks.
    events_tx: mpsc::Sender<TransportEvent>,
    /// Events from connection tasks.
    events: mpsc::Receiver<TransportEvent>,
}

impl WsClient {
    /// Creates a client for the given upstream. Nothing is dialed yet.
    #[must_use]
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            url,
            connect_timeout,
            upstream: Arc::new(Mutex::new(Upstream::default())),
            events_tx,
            events,
        }
    }

    /// Returns the upstream URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` while an upstream connection is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.upstream.lock().handle.is_some()
    }

    fn handle(&self, peer: PeerId) -> Result<PeerHandle> {
        self.upstream.lock().get(peer)
    }

    fn take(&self, peer: PeerId) -> Option<PeerHandle> {
        self.upstream.lock().take(peer)
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// Connection slot shared with the dial tasks.
///
/// Only the most recent attempt may install its handle. A slower handshake
/// from an earlier attempt finds `latest` moved on and closes itself.
#[derive(Default)]
struct Upstream {
    latest: Option<PeerId>,
    handle: Option<PeerHandle>,
}

impl Upstream {
    /// Records a new attempt and hands back the connection it replaces.
    fn begin(&mut self, peer: PeerId) -> Option<PeerHandle> {
        self.latest = Some(peer);
        self.handle.take()
    }

    /// Installs `handle` if it belongs to the latest attempt.
    ///
    /// Returns the handle back when the attempt was superseded.
    fn install(&mut self, handle: PeerHandle) -> std::result::Result<(), PeerHandle> {
        if self.latest != Some(handle.peer()) {
            return Err(handle);
        }
        self.handle = Some(handle);
        Ok(())
    }

    fn get(&self, peer: PeerId) -> Result<PeerHandle> {
        match self.handle.as_ref() {
            Some(handle) if handle.peer() == peer => Ok(handle.clone()),
            Some(_) => Err(Error::peer_not_found(peer)),
            None => Err(Error::NotConnected),
        }
    }

    fn take(&mut self, peer: PeerId) -> Option<PeerHandle> {
        if self.handle.as_ref().is_some_and(|handle| handle.peer() == peer) {
            self.handle.take()
        } else {
            None
        }
    }
}

// ============================================================================
// WsClient - Transport
// ============================================================================

impl Transport for WsClient {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_recv().ok()?;
        if let TransportEvent::Closed { peer } = &event {
            self.take(*peer);
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
        if let Some(handle) = self.take(peer) {
            handle.close(None);
        }
    }

    fn reject(&mut self, peer: PeerId, reason: CloseReason) {
        if let Some(handle) = self.take(peer) {
            handle.close(Some(reason));
        }
    }

    fn connect(&mut self) -> Result<PeerId> {
        let peer = PeerId::next();
        if let Some(stale) = self.upstream.lock().begin(peer) {
            stale.close(None);
        }

        info!(%peer, url = %self.url, "Connecting to upstream");

        tokio::spawn(dial(
            peer,
            self.url.clone(),
            self.connect_timeout,
            Arc::clone(&self.upstream),
            self.events_tx.clone(),
        ));

        Ok(peer)
    }
}

// ============================================================================
// Dial Task
// ============================================================================

/// Runs one handshake and, on success, the connection itself.
async fn dial(
    peer: PeerId,
    url: Url,
    connect_timeout: Duration,
    upstream: Arc<Mutex<Upstream>>,
    events: mpsc::Sender<TransportEvent>,
) {
    let result = match timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "handshake timed out after {} ms",
            connect_timeout.as_millis()
        )),
    };

    let mut ws_stream = match result {
        Ok(ws_stream) => ws_stream,
        Err(message) => {
            warn!(%peer, %url, error = %message, "Upstream connection failed");
            let _ = events.send(TransportEvent::Error { peer, message }).await;
            let _ = events.send(TransportEvent::Closed { peer }).await;
            return;
        }
    };

    let remote = match ws_stream.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.peer_addr().ok(),
        _ => None,
    };

    let (handle, commands) = PeerHandle::channel(peer);
    let installed = upstream.lock().install(handle).is_ok();
    if !installed {
        debug!(%peer, "Handshake finished after a newer attempt, closing");
        let _ = ws_stream.close(None).await;
        let _ = events.send(TransportEvent::Closed { peer }).await;
        return;
    }

    if events
        .send(TransportEvent::Opened { peer, remote })
        .await
        .is_err()
    {
        debug!(%peer, "Event queue closed before upstream opened");
        return;
    }

    run_peer(peer, ws_stream, commands, events).await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::transport::WsServer;

    const WAIT: Duration = Duration::from_secs(2);

    async fn wait_event(transport: &mut impl Transport) -> TransportEvent {
        timeout(WAIT, async {
            loop {
                if let Some(event) = transport.poll_event() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event in time")
    }

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let mut server = WsServer::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let url = Url::parse(&server.ws_url()).unwrap();
        let mut client = WsClient::new(url, WAIT);

        let peer = client.connect().unwrap();
        let TransportEvent::Opened { peer: opened, remote } = wait_event(&mut client).await else {
            panic!("expected Opened");
        };
        assert_eq!(opened, peer);
        assert_eq!(remote.map(|addr| addr.port()), Some(server.port()));
        assert!(client.is_connected());

        let server_peer = wait_event(&mut server).await.peer();

        client.send_text(peer, "upstream hello").unwrap();
        assert_eq!(
            wait_event(&mut server).await,
            TransportEvent::Text {
                peer: server_peer,
                text: "upstream hello".into()
            }
        );

        server.send_text(server_peer, "getSensitivity").unwrap();
        assert_eq!(
            wait_event(&mut client).await,
            TransportEvent::Text {
                peer,
                text: "getSensitivity".into()
            }
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_closed() {
        // Bind and drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
        let mut client = WsClient::new(url, WAIT);

        let peer = client.connect().unwrap();
        assert!(matches!(
            wait_event(&mut client).await,
            TransportEvent::Error { peer: p, .. } if p == peer
        ));
        assert_eq!(wait_event(&mut client).await, TransportEvent::Closed { peer });
        assert!(!client.is_connected());
    }

    #[test]
    fn test_superseded_handshake_cannot_replace_newer_connection() {
        let mut upstream = Upstream::default();
        let older = PeerId::next();
        let newer = PeerId::next();

        assert!(upstream.begin(older).is_none());
        assert!(upstream.begin(newer).is_none());

        // The newer handshake finishes first.
        let (live, _live_commands) = PeerHandle::channel(newer);
        assert!(upstream.install(live).is_ok());

        // Then the older one completes and must be turned away.
        let (stale, _stale_commands) = PeerHandle::channel(older);
        let refused = upstream.install(stale).unwrap_err();
        assert_eq!(refused.peer(), older);

        assert_eq!(upstream.get(newer).unwrap().peer(), newer);
        assert!(matches!(upstream.get(older), Err(Error::PeerNotFound { .. })));
    }

    #[test]
    fn test_new_attempt_hands_back_previous_connection() {
        let mut upstream = Upstream::default();
        let first = PeerId::next();
        upstream.begin(first);
        let (handle, _commands) = PeerHandle::channel(first);
        upstream.install(handle).unwrap();

        let replaced = upstream.begin(PeerId::next()).expect("previous connection");
        assert_eq!(replaced.peer(), first);
        assert!(upstream.handle.is_none());
    }

    #[test]
    fn test_send_without_connection() {
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        let mut client = WsClient::new(url, WAIT);
        let err = client.send_text(PeerId::new(1), "x").unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
