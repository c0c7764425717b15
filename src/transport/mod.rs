//! WebSocket transport layer.
//!
//! This module owns the sockets. The rest of the crate sees them only through
//! the [`Transport`] trait, so the bridge loop stays synchronous and never
//! blocks on the network.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   try_send (cap 8)   ┌───────────────┐
//! │                  │ ───────────────────► │  peer task 1  │◄──► WebSocket
//! │   Bridge loop    │                      └───────────────┘
//! │  (Transport API) │   try_send (cap 8)   ┌───────────────┐
//! │                  │ ───────────────────► │  peer task 2  │◄──► WebSocket
//! │                  │                      └───────────────┘
//! │                  │◄───────────────────────────┘
//! └──────────────────┘   TransportEvent queue (cap 64), drained with try_recv
//! ```
//!
//! Socket tasks never touch bridge state. They report everything that happens
//! on the wire as a [`TransportEvent`] and the loop picks the events up on its
//! next pass.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-peer socket task and its command queue |
//! | `server` | Inbound listener (`WsServer`) |
//! | `client` | Outbound upstream (`WsClient`) |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound WebSocket transport.
pub mod client;

/// Per-peer socket task.
pub mod connection;

/// Inbound WebSocket transport.
pub mod server;

/// In-memory transport for tests.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::WsClient;
pub use server::WsServer;

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the shared event queue drained by the bridge loop.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Capacity of each peer's outgoing message queue.
pub const PEER_QUEUE_CAPACITY: usize = 8;

/// Close sent to a connection refused because the client table is full.
pub const CAPACITY_EXCEEDED: CloseReason = CloseReason {
    code: 1013,
    reason: "capacity exceeded",
};

// ============================================================================
// CloseReason
// ============================================================================

/// WebSocket close code and reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code (RFC 6455 §7.4).
    pub code: u16,
    /// Human-readable reason.
    pub reason: &'static str,
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Something that happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the peer can be sent to.
    Opened {
        /// The new peer.
        peer: PeerId,
        /// Remote address, when known.
        remote: Option<SocketAddr>,
    },
    /// The connection is gone. Always the last event for a peer.
    Closed {
        /// The closed peer.
        peer: PeerId,
    },
    /// A text frame arrived.
    Text {
        /// Sender.
        peer: PeerId,
        /// Frame payload.
        text: String,
    },
    /// Answer to one of our pings.
    Pong {
        /// Answering peer.
        peer: PeerId,
    },
    /// Socket or handshake error. A `Closed` for the same peer follows.
    Error {
        /// Affected peer.
        peer: PeerId,
        /// Description of the failure.
        message: String,
    },
}

impl TransportEvent {
    /// Returns the peer the event concerns.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Opened { peer, .. }
            | Self::Closed { peer }
            | Self::Text { peer, .. }
            | Self::Pong { peer }
            | Self::Error { peer, .. } => *peer,
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Non-blocking socket seam used by the connection manager.
///
/// Every method returns immediately. Sends are queued to the peer's socket
/// task and fail at once if the queue is full or the peer is gone.
pub trait Transport {
    /// Returns the next pending event, if any.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Queues one text frame for a peer.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerNotFound`] if the peer is unknown
    /// - [`Error::SendFailed`] if its queue is full or closed
    fn send_text(&mut self, peer: PeerId, text: &str) -> Result<()>;

    /// Queues a ping for a peer. The answer arrives as [`TransportEvent::Pong`].
    ///
    /// # Errors
    ///
    /// Same as [`Transport::send_text`].
    fn ping(&mut self, peer: PeerId) -> Result<()>;

    /// Closes a peer normally. Unknown peers are ignored.
    fn close(&mut self, peer: PeerId);

    /// Closes a freshly opened peer with an explicit reason.
    fn reject(&mut self, peer: PeerId, reason: CloseReason);

    /// Starts one outbound connection attempt and returns its peer.
    ///
    /// The outcome arrives later as `Opened`, or as `Error` then `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for transports that only accept.
    fn connect(&mut self) -> Result<PeerId> {
        Err(Error::config("this transport does not open outbound connections"))
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }

    fn send_text(&mut self, peer: PeerId, text: &str) -> Result<()> {
        (**self).send_text(peer, text)
    }

    fn ping(&mut self, peer: PeerId) -> Result<()> {
        (**self).ping(peer)
    }

    fn close(&mut self, peer: PeerId) {
        (**self).close(peer);
    }

    fn reject(&mut self, peer: PeerId, reason: CloseReason) {
        (**self).reject(peer, reason);
    }

    fn connect(&mut self) -> Result<PeerId> {
        (**self).connect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_close_code() {
        assert_eq!(CAPACITY_EXCEEDED.code, 1013);
        assert_eq!(CAPACITY_EXCEEDED.reason, "capacity exceeded");
    }

    #[test]
    fn test_event_peer() {
        let peer = PeerId::new(9);
        let events = [
            TransportEvent::Opened { peer, remote: None },
            TransportEvent::Closed { peer },
            TransportEvent::Text {
                peer,
                text: "x".into(),
            },
            TransportEvent::Pong { peer },
            TransportEvent::Error {
                peer,
                message: "reset".into(),
            },
        ];
        assert!(events.iter().all(|event| event.peer() == peer));
    }
}
