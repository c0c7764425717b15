//! Connection management for both deployment roles.
//!
//! [`ConnectionManager`] wraps the role chosen at start-up. The bridge loop
//! calls [`service`](ConnectionManager::service) once per pass and reacts to
//! the returned [`LinkEvent`]s.
//!
//! | Role | Type | Destinations |
//! |------|------|--------------|
//! | Client | [`ClientLink`] | One upstream, reconnect timer, heartbeat |
//! | Server | [`ServerHub`] | Up to `max_clients` inbound clients, heartbeat each |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Upstream state machine |
//! | `server` | Client table and broadcast |
//! | `heartbeat` | Ping/pong bookkeeping |

// ============================================================================
// Submodules
// ============================================================================

/// Client role.
pub mod client;

/// Keepalive.
pub mod heartbeat;

/// Server role.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{ClientLink, LinkState};
pub use heartbeat::{Heartbeat, HeartbeatAction};
pub use server::{ClientConnection, ServerHub};

// ============================================================================
// Imports
// ============================================================================

use crate::config::{BridgeConfig, Role};
use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::transport::Transport;

// ============================================================================
// LinkEvent
// ============================================================================

/// Notification from the connection manager to the bridge loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Client role: upstream opened.
    Connected,
    /// Client role: upstream lost.
    Disconnected,
    /// Server role: client admitted into a slot.
    ClientJoined(ClientId),
    /// Server role: client gone.
    ClientLeft(ClientId),
    /// Server role: connection refused, table full.
    ClientRejected {
        /// Slots in the table.
        capacity: usize,
    },
    /// Client role: text from upstream, to be written to the sensor.
    Command(String),
}

impl LinkEvent {
    /// The error this event reports, if it is a refusal.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match self {
            Self::ClientRejected { capacity } => Some(Error::capacity_exceeded(*capacity)),
            _ => None,
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// The active network role.
pub enum ConnectionManager {
    /// One outbound upstream.
    Client(ClientLink),
    /// Many inbound clients.
    Server(ServerHub),
}

impl ConnectionManager {
    /// Creates a client-role manager.
    #[must_use]
    pub fn client(transport: Box<dyn Transport>, config: &BridgeConfig) -> Self {
        Self::Client(ClientLink::new(transport, config))
    }

    /// Creates a server-role manager.
    #[must_use]
    pub fn server(transport: Box<dyn Transport>, config: &BridgeConfig) -> Self {
        Self::Server(ServerHub::new(transport, config))
    }

    /// Creates the manager for `config.role`.
    #[must_use]
    pub fn for_role(transport: Box<dyn Transport>, config: &BridgeConfig) -> Self {
        match config.role {
            Role::Client => Self::client(transport, config),
            Role::Server => Self::server(transport, config),
        }
    }

    /// Returns the role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Client(_) => Role::Client,
            Self::Server(_) => Role::Server,
        }
    }

    /// Drains transport events and runs reconnect and heartbeat bookkeeping.
    ///
    /// `network_ready` only matters in client role.
    pub fn service(&mut self, now_ms: u64, network_ready: bool) -> Vec<LinkEvent> {
        match self {
            Self::Client(link) => link.service(now_ms, network_ready),
            Self::Server(hub) => hub.service(now_ms),
        }
    }

    /// Delivers `text` to every live destination and returns the count.
    pub fn publish(&mut self, text: &str) -> usize {
        match self {
            Self::Client(link) => link.publish(text),
            Self::Server(hub) => hub.publish(text),
        }
    }

    /// Sends `text` to one client.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] in client role
    /// - see [`ServerHub::send_to`]
    pub fn send_to(&mut self, client: ClientId, text: &str) -> Result<()> {
        match self {
            Self::Client(_) => Err(Error::config("send_to is only available in server role")),
            Self::Server(hub) => hub.send_to(client, text),
        }
    }

    /// Upstream state; `None` in server role.
    #[inline]
    #[must_use]
    pub fn connection_state(&self) -> Option<LinkState> {
        match self {
            Self::Client(link) => Some(link.state()),
            Self::Server(_) => None,
        }
    }

    /// Number of live destinations: admitted clients, or 1 while connected.
    #[must_use]
    pub fn client_count(&self) -> usize {
        match self {
            Self::Client(link) => usize::from(link.state() == LinkState::Connected),
            Self::Server(hub) => hub.client_count(),
        }
    }

    /// Messages lost to failed sends.
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        match self {
            Self::Client(link) => link.send_failures(),
            Self::Server(hub) => hub.send_failures(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::MockTransport;

    #[test]
    fn test_role_dispatch() {
        let config = BridgeConfig::new().with_role(Role::Client);
        let mut manager = ConnectionManager::for_role(Box::new(MockTransport::new()), &config);
        assert_eq!(manager.role(), Role::Client);
        assert_eq!(manager.connection_state(), Some(LinkState::Disconnected));
        assert_eq!(manager.client_count(), 0);
        assert!(manager.send_to(ClientId::new(0), "x").is_err());

        let config = BridgeConfig::new();
        let manager = ConnectionManager::for_role(Box::new(MockTransport::new()), &config);
        assert_eq!(manager.role(), Role::Server);
        assert_eq!(manager.connection_state(), None);
    }

    #[test]
    fn test_rejection_carries_capacity_error() {
        let event = LinkEvent::ClientRejected { capacity: 4 };
        let err = event.error().expect("rejection is an error");
        assert!(matches!(err, Error::CapacityExceeded { capacity: 4 }));
        assert!(err.is_recoverable());

        assert!(LinkEvent::ClientJoined(ClientId::new(0)).error().is_none());
    }

    #[test]
    fn test_client_count_in_client_role() {
        let mock = MockTransport::new();
        let config = BridgeConfig::new().with_role(Role::Client);
        let mut manager = ConnectionManager::client(Box::new(mock.clone()), &config);

        manager.service(0, true);
        let peer = mock.connects()[0];
        mock.push_event(crate::transport::TransportEvent::Opened { peer, remote: None });
        assert_eq!(manager.service(1, true), vec![LinkEvent::Connected]);
        assert_eq!(manager.client_count(), 1);
        assert_eq!(manager.publish("x"), 1);
        assert_eq!(manager.send_failures(), 0);
    }
}
