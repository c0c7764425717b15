//! Client role: one upstream connection.
//!
//! # State Machine
//!
//! ```text
//!                 network edge / reconnect timer
//!  Disconnected ─────────────────────────────────► Connecting
//!       ▲                                              │
//!       │ Error / Closed / send failure /              │ Opened
//!       │ heartbeat expiry / network lost              ▼
//!       └─────────────────────────────────────────  Connected
//! ```
//!
//! Handshake failure also returns to `Disconnected`. The reconnect timer runs
//! from the last attempt or disconnect, whichever came last.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;

use tracing::{debug, error, info, trace, warn};

use crate::config::{BridgeConfig, HeartbeatConfig};
use crate::identifiers::PeerId;
use crate::transport::{Transport, TransportEvent};

use super::LinkEvent;
use super::heartbeat::{Heartbeat, HeartbeatAction};

// ============================================================================
// LinkState
// ============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Upstream is open.
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ClientLink
// ============================================================================

/// Client-role connection manager.
pub struct ClientLink {
    transport: Box<dyn Transport>,
    state: LinkState,
    /// Peer of the current attempt or connection.
    peer: Option<PeerId>,
    heartbeat_config: HeartbeatConfig,
    heartbeat: Option<Heartbeat>,
    reconnect_interval_ms: u64,
    /// Last attempt or disconnect.
    last_change_at_ms: Option<u64>,
    network_was_ready: bool,
    clock_ms: u64,
    send_failures: u64,
    pending: Vec<LinkEvent>,
}

impl ClientLink {
    /// Creates a disconnected link. Nothing is dialed until the first
    /// [`service`](Self::service) with the network ready.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: &BridgeConfig) -> Self {
        Self {
            transport,
            state: LinkState::Disconnected,
            peer: None,
            heartbeat_config: config.heartbeat,
            heartbeat: None,
            reconnect_interval_ms: config.reconnect_interval_ms,
            last_change_at_ms: None,
            network_was_ready: false,
            clock_ms: 0,
            send_failures: 0,
            pending: Vec::new(),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Messages lost to failed sends.
    #[inline]
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Processes transport events, reconnects and heartbeat.
    pub fn service(&mut self, now_ms: u64, network_ready: bool) -> Vec<LinkEvent> {
        self.clock_ms = now_ms;
        let mut events = mem::take(&mut self.pending);

        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event, now_ms, &mut events);
        }

        let edge = network_ready && !self.network_was_ready;
        self.network_was_ready = network_ready;

        if !network_ready {
            if self.state != LinkState::Disconnected {
                info!("Network lost, dropping upstream");
                self.drop_link(now_ms, &mut events);
            }
            return events;
        }

        match self.state {
            LinkState::Disconnected => {
                if edge || self.reconnect_due(now_ms) {
                    self.start_attempt(now_ms);
                }
            }
            // The transport bounds the handshake with its connect timeout.
            LinkState::Connecting => {}
            LinkState::Connected => self.run_heartbeat(now_ms, &mut events),
        }

        events
    }

    /// Sends to the upstream. Returns `1` if queued, `0` otherwise.
    ///
    /// Not connected: the message is dropped silently. Failed send: the
    /// message is lost and the link drops to `Disconnected`.
    pub fn publish(&mut self, text: &str) -> usize {
        let (LinkState::Connected, Some(peer)) = (self.state, self.peer) else {
            trace!(state = %self.state, "Publish dropped, upstream not connected");
            return 0;
        };

        match self.transport.send_text(peer, text) {
            Ok(()) => 1,
            Err(e) => {
                warn!(%peer, error = %e, "Upstream send failed");
                self.send_failures += 1;
                let mut events = mem::take(&mut self.pending);
                self.drop_link(self.clock_ms, &mut events);
                self.pending = events;
                0
            }
        }
    }

    fn reconnect_due(&self, now_ms: u64) -> bool {
        self.last_change_at_ms
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.reconnect_interval_ms)
    }

    fn start_attempt(&mut self, now_ms: u64) {
        self.last_change_at_ms = Some(now_ms);

        match self.transport.connect() {
            Ok(peer) => {
                debug!(%peer, "Upstream attempt started");
                self.peer = Some(peer);
                self.state = LinkState::Connecting;
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Upstream attempt could not start");
            }
            Err(e) => {
                error!(error = %e, "Upstream cannot be dialed by this transport");
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent, now_ms: u64, events: &mut Vec<LinkEvent>) {
        let peer = event.peer();
        if self.peer != Some(peer) {
            // Leftover from an earlier attempt
            if matches!(event, TransportEvent::Opened { .. }) {
                self.transport.close(peer);
            }
            trace!(%peer, "Stale transport event ignored");
            return;
        }

        match event {
            TransportEvent::Opened { remote, .. } => {
                if self.state != LinkState::Connecting {
                    return;
                }
                info!(%peer, ?remote, "Upstream connected");
                self.state = LinkState::Connected;
                self.heartbeat = Some(Heartbeat::new(self.heartbeat_config, now_ms));
                events.push(LinkEvent::Connected);
            }

            TransportEvent::Text { text, .. } => {
                debug!(%peer, command = %text, "Command from upstream");
                events.push(LinkEvent::Command(text));
            }

            TransportEvent::Pong { .. } => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.on_pong(now_ms);
                }
            }

            TransportEvent::Error { message, .. } => {
                warn!(%peer, error = %message, state = %self.state, "Upstream error");
                self.drop_link(now_ms, events);
            }

            TransportEvent::Closed { .. } => {
                info!(%peer, "Upstream closed");
                self.drop_link(now_ms, events);
            }
        }
    }

    fn run_heartbeat(&mut self, now_ms: u64, events: &mut Vec<LinkEvent>) {
        let (Some(heartbeat), Some(peer)) = (self.heartbeat.as_mut(), self.peer) else {
            return;
        };

        match heartbeat.poll(now_ms) {
            Some(HeartbeatAction::Ping) => {
                trace!(%peer, "Heartbeat ping");
                if let Err(e) = self.transport.ping(peer) {
                    warn!(%peer, error = %e, "Heartbeat ping failed");
                    self.drop_link(now_ms, events);
                }
            }
            Some(HeartbeatAction::Expired) => {
                warn!(%peer, missed = heartbeat.missed(), "Upstream heartbeat expired");
                self.drop_link(now_ms, events);
            }
            None => {}
        }
    }

    fn drop_link(&mut self, now_ms: u64, events: &mut Vec<LinkEvent>) {
        if let Some(peer) = self.peer.take() {
            self.transport.close(peer);
        }
        if self.state == LinkState::Connected {
            events.push(LinkEvent::Disconnected);
        }
        self.state = LinkState::Disconnected;
        self.heartbeat = None;
        self.last_change_at_ms = Some(now_ms);
    }
}

// ============================================================================
// Tests
// ============================================================================
