//! Bridge-wide mutable state.
//!
//! Everything here is owned by the [`Bridge`](crate::Bridge) and mutated only
//! from its loop. There are no statics.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tracker` | Last-published reading and the hysteresis filter |

// ============================================================================
// Submodules
// ============================================================================

/// Change detection.
pub mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub use tracker::{DEFAULT_HYSTERESIS_CM, PublishReason, PublishableEvent, StateTracker};

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::frame::SensorReading;

// ============================================================================
// BridgeStats
// ============================================================================

/// Diagnostic counters. Never sent on the data channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Lines returned by the frame reader.
    pub lines: u64,
    /// Lines outside the active grammar.
    pub ignored: u64,
    /// Frames with the header but broken structure.
    pub malformed: u64,
    /// Lines cut at the length cap.
    pub truncated: u64,
    /// Readings that passed the filter.
    pub published: u64,
    /// Readings dropped by the filter.
    pub suppressed: u64,
    /// Messages lost to failed sends.
    pub send_failures: u64,
    /// Server role: connections refused because the table was full.
    pub rejected_clients: u64,
    /// Commands written to the sensor.
    pub commands_forwarded: u64,
}

// ============================================================================
// BridgeState
// ============================================================================

/// State that survives across loop iterations.
#[derive(Debug, Clone, Default)]
pub struct BridgeState {
    /// Last-published reading and filter.
    pub tracker: StateTracker,
    /// Whether the network is up.
    pub network_ready: bool,
    /// Diagnostic counters.
    pub stats: BridgeStats,
}

impl BridgeState {
    /// Creates the start-up state.
    #[must_use]
    pub fn new(hysteresis_cm: u32) -> Self {
        Self {
            tracker: StateTracker::new(hysteresis_cm),
            network_ready: false,
            stats: BridgeStats::default(),
        }
    }

    /// Last published reading, if any.
    #[inline]
    #[must_use]
    pub fn last_published(&self) -> Option<&SensorReading> {
        self.tracker.last_published()
    }

    /// Timestamp of the last publish (ms since boot).
    #[inline]
    #[must_use]
    pub fn last_published_at_ms(&self) -> u64 {
        self.tracker.last_published_at_ms()
    }
}
