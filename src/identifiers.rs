//! Type-safe identifiers for connections.
//!
//! Two different numbers name a connection and they must not be mixed up:
//!
//! | Type | Owner | Meaning |
//! |------|-------|---------|
//! | [`PeerId`] | transport | One WebSocket connection, never reused |
//! | [`ClientId`] | server hub | Slot in the fixed client table, reused after disconnect |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// PeerId
// ============================================================================

/// Global counter for transport peers.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one transport-level connection.
///
/// Allocated by the transport when a socket opens. Never reused for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Creates a peer ID from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Allocates the next unique peer ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ClientId
// ============================================================================

/// Slot index of an admitted client in the server-role table.
///
/// The lowest free slot is handed out on admission, so IDs are small and get
/// reused once a client leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u8);

impl ClientId {
    /// Creates a client ID from a slot index.
    #[inline]
    #[must_use]
    pub const fn new(slot: u8) -> Self {
        Self(slot)
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
