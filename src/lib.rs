//! mmWave bridge - presence sensor UART to WebSocket.
//!
//! This library reads line-oriented frames from an mmWave presence sensor,
//! filters out insignificant changes, and publishes JSON envelopes over
//! WebSocket, either to many local clients or to one upstream server.
//!
//! # Architecture
//!
//! ```text
//!  UART ──► FrameReader ──► FrameParser ──► StateTracker ──► Envelope ──► ConnectionManager
//!   ▲                                                                          │
//!   └──────────────────────── commands (upstream text, console) ◄─────────────┘
//! ```
//!
//! Key design principles:
//!
//! - One [`Bridge`] owns the whole pipeline; there is no global state
//! - The loop never blocks: sensor reads, sends and socket events are all polled
//! - Socket tasks talk to the loop only through bounded queues
//! - A reading is published only when presence, motion, or distance (beyond
//!   the hysteresis) changed
//!
//! # Quick Start
//!
//! ```no_run
//! use mmwave_bridge::{Bridge, BridgeConfig, ConnectionManager, Result, SerialSensor, WsServer};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let config = BridgeConfig::new().with_sensor_id("hall");
//!     config.validate()?;
//!
//!     let sensor = SerialSensor::open(&config.serial_path, config.baud_rate)?;
//!     let server = WsServer::bind(config.bind_addr).await?;
//!     let manager = ConnectionManager::server(Box::new(server), &config);
//!
//!     let mut bridge = Bridge::new(&config, sensor, manager);
//!     bridge.set_network_ready(true);
//!     bridge
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | The loop: [`Bridge`], [`TickOutcome`] |
//! | [`config`] | [`BridgeConfig`] and its parts |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | Line extraction and parsing |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`link`] | Client and server connection management |
//! | [`protocol`] | JSON envelopes |
//! | [`sensor`] | UART, replay and command sources |
//! | [`state`] | Change detection and counters |
//! | [`transport`] | WebSocket sockets behind the [`Transport`] trait |

// ============================================================================
// Modules
// ============================================================================

/// The bridge loop.
pub mod bridge;

/// Bridge configuration.
///
/// Use [`BridgeConfig::new()`] and the `with_*` methods, or load a JSON file.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Sensor frame reading and parsing.
pub mod frame;

/// Type-safe identifiers for connections.
pub mod identifiers;

/// Connection management.
///
/// One [`ConnectionManager`] per process, in either client or server role.
pub mod link;

/// Wire message types.
pub mod protocol;

/// Sensor-side I/O.
pub mod sensor;

/// Change detection and loop state.
pub mod state;

/// WebSocket transport layer.
///
/// Socket tasks and the [`Transport`] seam used by [`link`].
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Loop
pub use bridge::{Bridge, TickOutcome};

// Configuration
pub use config::{BridgeConfig, HeartbeatConfig, ParseMode, Role};

// Error types
pub use error::{Error, Result};

// Frames
pub use frame::{FrameParser, FrameReader, ParseError, Publication, RawLine, SensorReading};

// Identifier types
pub use identifiers::{ClientId, PeerId};

// Connection management
pub use link::{ConnectionManager, LinkEvent, LinkState};

// Envelopes
pub use protocol::Envelope;

// Sensor I/O
pub use sensor::{CommandSource, ConsoleCommands, ScriptedSensor, SensorPort, SerialSensor};

// State
pub use state::{BridgeState, BridgeStats, PublishReason, PublishableEvent, StateTracker};

// Transport
pub use transport::{Transport, TransportEvent, WsClient, WsServer};
