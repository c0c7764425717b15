//! Error types for the mmWave bridge.
//!
//! This module defines all error types used throughout the crate.
//! Line-level parse outcomes live in [`crate::frame::ParseError`]; they are
//! never fatal and never surface through this type.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use mmwave_bridge::{BridgeConfig, Result};
//!
//! fn load() -> Result<BridgeConfig> {
//!     let config = BridgeConfig::from_json_file("bridge.json")?;
//!     config.validate()?;
//!     Ok(config)
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::SendFailed`], [`Error::PeerNotFound`], [`Error::NotConnected`], [`Error::ConnectionClosed`] |
//! | Capacity | [`Error::CapacityExceeded`] |
//! | External | [`Error::Io`], [`Error::Serial`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::PeerId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// After start-up none of these are fatal: the bridge loop logs them and
/// keeps running.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid or inconsistent with
    /// the selected role.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Sending a message to one peer failed.
    ///
    /// The message is lost. In server role the peer is dropped from the
    /// client table; in client role the link falls back to `Disconnected`.
    #[error("Send to peer {peer} failed: {message}")]
    SendFailed {
        /// Destination peer.
        peer: PeerId,
        /// Description of the failure.
        message: String,
    },

    /// Peer is not known to the transport.
    #[error("Peer not found: {peer}")]
    PeerNotFound {
        /// The unknown peer.
        peer: PeerId,
    },

    /// Client role: no upstream connection is open.
    #[error("Not connected")]
    NotConnected,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Capacity Errors
    // ========================================================================
    /// Server role: the client table is full.
    ///
    /// The new connection is rejected; existing clients are unaffected.
    #[error("Client table full ({capacity} slots)")]
    CapacityExceeded {
        /// Number of slots in the table.
        capacity: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Serial port error.
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Upstream URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a send failure for one peer.
    #[inline]
    pub fn send_failed(peer: PeerId, message: impl Into<String>) -> Self {
        Self::SendFailed {
            peer,
            message: message.into(),
        }
    }

    /// Creates a peer not found error.
    #[inline]
    pub fn peer_not_found(peer: PeerId) -> Self {
        Self::PeerNotFound { peer }
    }

    /// Creates a capacity exceeded error.
    #[inline]
    pub fn capacity_exceeded(capacity: usize) -> Self {
        Self::CapacityExceeded { capacity }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from the network transport.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::SendFailed { .. }
                | Self::PeerNotFound { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are handled by dropping the affected message or
    /// peer; the bridge keeps running.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SendFailed { .. }
                | Self::PeerNotFound { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::CapacityExceeded { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::config("max_clients must be between 1 and 8");
        assert_eq!(
            err.to_string(),
            "Configuration error: max_clients must be between 1 and 8"
        );
    }

    #[test]
    fn test_send_failed_display() {
        let err = Error::send_failed(PeerId::new(7), "queue full");
        assert_eq!(err.to_string(), "Send to peer 7 failed: queue full");
    }

    #[test]
    fn test_capacity_display() {
        let err = Error::capacity_exceeded(4);
        assert_eq!(err.to_string(), "Client table full (4 slots)");
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::send_failed(PeerId::new(1), "x").is_transport_error());
        assert!(Error::NotConnected.is_transport_error());
        assert!(Error::ConnectionClosed.is_transport_error());
        assert!(!Error::config("x").is_transport_error());
        assert!(!Error::capacity_exceeded(4).is_transport_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::capacity_exceeded(4).is_recoverable());
        assert!(Error::peer_not_found(PeerId::new(3)).is_recoverable());
        assert!(!Error::config("x").is_recoverable());
        assert!(Error::send_failed(PeerId::new(1), "x").is_recoverable());
        assert!(Error::NotConnected.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "no such device");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
