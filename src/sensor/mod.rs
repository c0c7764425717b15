//! Sensor-side I/O.
//!
//! The bridge talks to the mmWave sensor through [`SensorPort`]: a
//! non-blocking byte source for frames plus a line sink for commands.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `serial` | UART port via `serialport` (8N1) |
//! | `scripted` | In-memory port for replaying recorded frames |
//! | `commands` | Command channel (console lines) forwarded to the sensor |

// ============================================================================
// Submodules
// ============================================================================

/// Command channel sources.
pub mod commands;

/// In-memory sensor port.
pub mod scripted;

/// UART sensor port.
pub mod serial;

// ============================================================================
// Re-exports
// ============================================================================

pub use commands::{CommandSource, ConsoleCommands};
pub use scripted::ScriptedSensor;
pub use serial::SerialSensor;

use crate::error::Result;

// ============================================================================
// SensorPort
// ============================================================================

/// Byte-level link to the sensor.
///
/// Implementations must never block: a read with nothing pending returns
/// `Ok(0)` immediately.
pub trait SensorPort {
    /// Reads whatever bytes are pending into `buffer`.
    ///
    /// Returns the number of bytes read, `0` when nothing is available.
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Writes one command line to the sensor, terminator included.
    fn write_line(&mut self, line: &str) -> Result<()>;
}

impl<P: SensorPort + ?Sized> SensorPort for Box<P> {
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).read_available(buffer)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        (**self).write_line(line)
    }
}
