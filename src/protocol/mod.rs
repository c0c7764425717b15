//! Data channel message types.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `Envelope::Reading` | Bridge → Peer | Significant sensor reading |
//! | `Envelope::Raw` | Bridge → Peer | Passthrough sensor line |
//! | text frame | Upstream → Bridge | Sensor command (client role) |
//!
//! Every message is one WebSocket text frame.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope encoding and decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope encoding and decoding.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, RawEnvelope, ReadingEnvelope};
