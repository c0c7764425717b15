//! Sensor frame handling.
//!
//! Raw UART bytes become lines in [`FrameReader`], and lines become typed
//! [`Publication`]s in [`FrameParser`].
//!
//! ```text
//! bytes ──► FrameReader ──► RawLine ──► FrameParser ──► Publication
//!                                            │
//!                                            └──► ParseError::{Ignored, MalformedFrame}
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `reader` | Non-blocking, length-capped line extraction |
//! | `parser` | Passthrough and `$JYBSS` grammars |
//! | `reading` | `SensorReading` and `Publication` types |

// ============================================================================
// Submodules
// ============================================================================

/// Line grammars.
pub mod parser;

/// Line extraction.
pub mod reader;

/// Parsed sensor data.
pub mod reading;

// ============================================================================
// Re-exports
// ============================================================================

pub use parser::{FrameParser, ParseError, STRUCTURED_PREFIX, parse_distance, parse_structured};
pub use reader::{FrameReader, RawLine};
pub use reading::{Publication, SensorReading};
