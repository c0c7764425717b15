//! Server role: a fixed table of inbound clients.
//!
//! # Client Table
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │ slot 0   │ slot 1   │ slot 2   │ slot 3   │   max_clients = 4
//! │ peer 17  │  free    │ peer 21  │  free    │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! A new connection takes the lowest free slot. When none is free it is
//! closed with code 1013 and the table is left alone. Broadcast walks the
//! table once; a client whose send fails is removed without holding up the
//! rest.

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::net::SocketAddr;

use tracing::{debug, info, trace, warn};

use crate::config::{BridgeConfig, HeartbeatConfig, MAX_CLIENT_SLOTS};
use crate::error::{Error, Result};
use crate::identifiers::{ClientId, PeerId};
use crate::transport::{CAPACITY_EXCEEDED, Transport, TransportEvent};

use super::LinkEvent;
use super::heartbeat::{Heartbeat, HeartbeatAction};

// ============================================================================
// ClientConnection
// ============================================================================

/// One admitted client.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ClientId,
    peer: PeerId,
    remote_address: Option<SocketAddr>,
    is_alive: bool,
    heartbeat: Heartbeat,
}

impl ClientConnection {
    fn new(
        id: ClientId,
        peer: PeerId,
        remote_address: Option<SocketAddr>,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            id,
            peer,
            remote_address,
            is_alive: true,
            heartbeat,
        }
    }

    /// Slot in the client table.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Transport handle.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Remote address, when the transport knows it.
    #[inline]
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// `false` once the transport reported an error for this client.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.is_alive
    }
}

// ============================================================================
// ServerHub
// ============================================================================

/// Server-role connection manager.
pub struct ServerHub {
    transport: Box<dyn Transport>,
    slots: Vec<Option<ClientConnection>>,
    heartbeat_config: HeartbeatConfig,
    rejected: u64,
    send_failures: u64,
    pending: Vec<LinkEvent>,
}

impl ServerHub {
    /// Creates an empty table with `config.max_clients` slots.
    ///
    /// The slot count is clamped to `1..=MAX_CLIENT_SLOTS` so every slot has
    /// a distinct [`ClientId`], even for a config that skipped `validate`.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, config: &BridgeConfig) -> Self {
        let capacity = config.max_clients.clamp(1, MAX_CLIENT_SLOTS);
        if capacity != config.max_clients {
            warn!(
                requested = config.max_clients,
                capacity, "max_clients out of range, client table clamped"
            );
        }

        Self {
            transport,
            slots: vec![None; capacity],
            heartbeat_config: config.heartbeat,
            rejected: 0,
            send_failures: 0,
            pending: Vec::new(),
        }
    }

    /// Number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of admitted clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Admitted clients in slot order.
    pub fn clients(&self) -> impl Iterator<Item = &ClientConnection> {
        self.slots.iter().flatten()
    }

    /// Connections refused because the table was full.
    #[inline]
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Messages lost to failed sends.
    #[inline]
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    /// Processes transport events and per-client heartbeats.
    pub fn service(&mut self, now_ms: u64) -> Vec<LinkEvent> {
        let mut events = mem::take(&mut self.pending);

        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event, now_ms, &mut events);
        }

        self.run_heartbeats(now_ms, &mut events);
        events
    }

    /// Sends `text` to every live client and returns how many took it.
    pub fn publish(&mut self, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for client in self.slots.iter_mut().flatten() {
            if !client.is_alive {
                continue;
            }
            match self.transport.send_text(client.peer, text) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(client = %client.id, peer = %client.peer, error = %e, "Broadcast to client failed");
                    client.is_alive = false;
                    failed.push(client.id);
                }
            }
        }

        self.send_failures += failed.len() as u64;
        for id in failed {
            self.remove(id, true);
        }

        trace!(delivered, "Broadcast done");
        delivered
    }

    /// Sends `text` to one client.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the slot is empty
    /// - [`Error::SendFailed`] if the send fails; the client is removed
    pub fn send_to(&mut self, id: ClientId, text: &str) -> Result<()> {
        let peer = self
            .slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(ClientConnection::peer)
            .ok_or(Error::NotConnected)?;

        if let Err(e) = self.transport.send_text(peer, text) {
            warn!(client = %id, %peer, error = %e, "Send to client failed");
            self.send_failures += 1;
            self.remove(id, true);
            return Err(e);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: TransportEvent, now_ms: u64, events: &mut Vec<LinkEvent>) {
        match event {
            TransportEvent::Opened { peer, remote } => self.admit(peer, remote, now_ms, events),

            TransportEvent::Closed { peer } => {
                if let Some(id) = self.find(peer) {
                    self.take_slot(id);
                    info!(client = %id, %peer, "Client disconnected");
                    events.push(LinkEvent::ClientLeft(id));
                }
            }

            TransportEvent::Text { peer, text } => {
                debug!(%peer, text = %text, "Ignoring text from client");
            }

            TransportEvent::Pong { peer } => {
                if let Some(client) = self.client_mut(peer) {
                    client.heartbeat.on_pong(now_ms);
                }
            }

            TransportEvent::Error { peer, message } => {
                if let Some(client) = self.client_mut(peer) {
                    warn!(client = %client.id, %peer, error = %message, "Client error");
                    client.is_alive = false;
                }
            }
        }
    }

    fn admit(
        &mut self,
        peer: PeerId,
        remote: Option<SocketAddr>,
        now_ms: u64,
        events: &mut Vec<LinkEvent>,
    ) {
        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .and_then(|index| u8::try_from(index).ok().map(|slot| (index, slot)));

        let Some((index, slot)) = free else {
            let capacity = self.slots.len();
            self.transport.reject(peer, CAPACITY_EXCEEDED);
            self.rejected += 1;
            debug!(%peer, ?remote, capacity, "Connection refused");
            events.push(LinkEvent::ClientRejected { capacity });
            return;
        };

        let id = ClientId::new(slot);
        let heartbeat = Heartbeat::new(self.heartbeat_config, now_ms);
        self.slots[index] = Some(ClientConnection::new(id, peer, remote, heartbeat));

        info!(client = %id, %peer, ?remote, "Client connected");
        events.push(LinkEvent::ClientJoined(id));
    }

    fn run_heartbeats(&mut self, now_ms: u64, events: &mut Vec<LinkEvent>) {
        let mut dead = Vec::new();

        // Errored clients wait for `Closed` without being pinged.
        for client in self.slots.iter_mut().flatten().filter(|c| c.is_alive) {
            match client.heartbeat.poll(now_ms) {
                Some(HeartbeatAction::Ping) => {
                    if let Err(e) = self.transport.ping(client.peer) {
                        warn!(client = %client.id, error = %e, "Heartbeat ping failed");
                        dead.push(client.id);
                    }
                }
                Some(HeartbeatAction::Expired) => {
                    warn!(
                        client = %client.id,
                        missed = client.heartbeat.missed(),
                        "Client heartbeat expired"
                    );
                    dead.push(client.id);
                }
                None => {}
            }
        }

        for id in dead {
            if self.remove(id, false) {
                events.push(LinkEvent::ClientLeft(id));
            }
        }
    }

    /// Removes a client and closes its peer. Returns `false` if the slot was empty.
    ///
    /// With `notify`, `ClientLeft` is queued for the next `service`.
    fn remove(&mut self, id: ClientId, notify: bool) -> bool {
        let Some(client) = self.take_slot(id) else {
            return false;
        };
        self.transport.close(client.peer);
        info!(client = %id, peer = %client.peer, "Client removed");
        if notify {
            self.pending.push(LinkEvent::ClientLeft(id));
        }
        true
    }

    fn take_slot(&mut self, id: ClientId) -> Option<ClientConnection> {
        self.slots.get_mut(id.index()).and_then(Option::take)
    }

    fn find(&self, peer: PeerId) -> Option<ClientId> {
        self.clients()
            .find(|client| client.peer == peer)
            .map(ClientConnection::id)
    }

    fn client_mut(&mut self, peer: PeerId) -> Option<&mut ClientConnection> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|client| client.peer == peer)
    }
}

// ============================================================================
// Tests
// ============================================================================
