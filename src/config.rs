//! Bridge configuration.
//!
//! Provides a type-safe interface for everything that is fixed per
//! deployment: role, frame grammar, sensor identity, UART and socket
//! endpoints, timing and capacity limits.
//!
//! # Example
//!
//! ```ignore
//! use mmwave_bridge::{BridgeConfig, ParseMode, Role};
//!
//! let config = BridgeConfig::new()
//!     .with_role(Role::Client)
//!     .with_mode(ParseMode::Passthrough)
//!     .with_upstream_url("ws://10.0.0.2:3000/ws")
//!     .with_sensor_id("hallway");
//!
//! config.validate()?;
//! ```
//!
//! Configuration can also be loaded from JSON; missing keys keep their
//! defaults:
//!
//! ```json
//! { "role": "server", "bind_addr": "0.0.0.0:81", "max_clients": 6 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on server-role client slots.
pub const MAX_CLIENT_SLOTS: usize = 8;

/// Smallest accepted line cap.
const MIN_LINE_LEN: usize = 16;

/// Default sensor identifier placed in every envelope.
pub const DEFAULT_SENSOR_ID: &str = "sensor1";

/// Default WebSocket port in server role.
const DEFAULT_WS_PORT: u16 = 81;

// ============================================================================
// Role / ParseMode
// ============================================================================

/// Which side of the socket this device plays.
///
/// Chosen once per deployment; the two roles never run together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accept inbound WebSocket clients and broadcast to all of them.
    #[default]
    Server,
    /// Keep one outbound connection to an upstream server.
    Client,
}

/// Grammar applied to sensor lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Parse `$JYBSS` frames into readings and filter them.
    #[default]
    Structured,
    /// Forward every line untouched inside a `raw` envelope.
    Passthrough,
}

// ============================================================================
// HeartbeatConfig
// ============================================================================

/// WebSocket keepalive parameters, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Time between pings on an idle connection.
    pub interval_ms: u64,
    /// Time the peer has to answer one ping.
    pub timeout_ms: u64,
    /// Consecutive unanswered pings before the connection is declared dead.
    pub max_missed: u8,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            timeout_ms: 3_000,
            max_missed: 2,
        }
    }
}

// ============================================================================
// BridgeConfig
// ============================================================================

/// Complete per-deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Socket role.
    pub role: Role,

    /// Frame grammar.
    pub mode: ParseMode,

    /// Identifier written into every envelope.
    pub sensor_id: String,

    /// Sensor UART device path.
    pub serial_path: String,

    /// Sensor UART baud rate (8N1).
    pub baud_rate: u32,

    /// Listen address in server role.
    pub bind_addr: SocketAddr,

    /// Upstream WebSocket URL in client role.
    pub upstream_url: Option<String>,

    /// Client table capacity in server role.
    pub max_clients: usize,

    /// Longest sensor line kept; longer lines are truncated.
    pub max_line_len: usize,

    /// Distance change (cm) that counts as significant.
    pub hysteresis_cm: u32,

    /// Delay between upstream connection attempts in client role.
    pub reconnect_interval_ms: u64,

    /// Limit on one upstream handshake in client role.
    pub connect_timeout_ms: u64,

    /// Keepalive parameters.
    pub heartbeat: HeartbeatConfig,

    /// Pause after each loop iteration.
    pub loop_yield_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            role: Role::Server,
            mode: ParseMode::Structured,
            sensor_id: DEFAULT_SENSOR_ID.to_string(),
            serial_path: "/dev/ttyAMA0".to_string(),
            baud_rate: 115_200,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_WS_PORT),
            upstream_url: None,
            max_clients: 4,
            max_line_len: 256,
            hysteresis_cm: 10,
            reconnect_interval_ms: 5_000,
            connect_timeout_ms: 10_000,
            heartbeat: HeartbeatConfig::default(),
            loop_yield_ms: 10,
        }
    }

    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a valid configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] if the content is not a valid configuration
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BridgeConfig {
    /// Sets the socket role.
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Sets the frame grammar.
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the envelope sensor identifier.
    #[inline]
    #[must_use]
    pub fn with_sensor_id(mut self, sensor_id: impl Into<String>) -> Self {
        self.sensor_id = sensor_id.into();
        self
    }

    /// Sets the UART device and baud rate.
    #[inline]
    #[must_use]
    pub fn with_serial(mut self, path: impl Into<String>, baud_rate: u32) -> Self {
        self.serial_path = path.into();
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the server-role listen address.
    #[inline]
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the client-role upstream URL.
    #[inline]
    #[must_use]
    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = Some(url.into());
        self
    }

    /// Sets the server-role client table capacity.
    #[inline]
    #[must_use]
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    /// Sets the sensor line cap.
    #[inline]
    #[must_use]
    pub fn with_max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    /// Sets the distance hysteresis in centimeters.
    #[inline]
    #[must_use]
    pub fn with_hysteresis_cm(mut self, hysteresis_cm: u32) -> Self {
        self.hysteresis_cm = hysteresis_cm;
        self
    }

    /// Sets the client-role reconnect interval.
    #[inline]
    #[must_use]
    pub fn with_reconnect_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reconnect_interval_ms = interval_ms;
        self
    }

    /// Sets the keepalive parameters.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the pause after each loop iteration.
    #[inline]
    #[must_use]
    pub fn with_loop_yield_ms(mut self, yield_ms: u64) -> Self {
        self.loop_yield_ms = yield_ms;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeConfig {
    /// Checks the configuration for the selected role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.sensor_id.trim().is_empty() {
            return Err(Error::config("sensor_id must not be empty"));
        }

        if !(1..=MAX_CLIENT_SLOTS).contains(&self.max_clients) {
            return Err(Error::config(format!(
                "max_clients must be between 1 and {MAX_CLIENT_SLOTS}, got {}",
                self.max_clients
            )));
        }

        if self.max_line_len < MIN_LINE_LEN {
            return Err(Error::config(format!(
                "max_line_len must be at least {MIN_LINE_LEN}, got {}",
                self.max_line_len
            )));
        }

        if self.baud_rate == 0 {
            return Err(Error::config("baud_rate must be non-zero"));
        }

        if self.reconnect_interval_ms == 0 {
            return Err(Error::config("reconnect_interval_ms must be non-zero"));
        }

        self.validate_heartbeat()?;

        if self.role == Role::Client {
            self.upstream_url()?;
        }

        Ok(())
    }

    /// Returns the parsed upstream URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no URL is set or the scheme is not `ws`
    /// - [`Error::Url`] if the URL does not parse
    pub fn upstream_url(&self) -> Result<Url> {
        let raw = self.upstream_url.as_deref().ok_or_else(|| {
            Error::config(
                "upstream_url is required in client role.\n\
                 Example: --upstream ws://192.168.4.2:3000/ws",
            )
        })?;

        let url = Url::parse(raw)?;
        match url.scheme() {
            "ws" => Ok(url),
            other => Err(Error::config(format!(
                "upstream_url must use ws:// (TLS is not built in), got {other}://"
            ))),
        }
    }

    fn validate_heartbeat(&self) -> Result<()> {
        let hb = &self.heartbeat;
        if hb.interval_ms == 0 || hb.timeout_ms == 0 {
            return Err(Error::config("heartbeat interval and timeout must be non-zero"));
        }
        if hb.timeout_ms >= hb.interval_ms {
            return Err(Error::config(format!(
                "heartbeat timeout ({} ms) must be shorter than the interval ({} ms)",
                hb.timeout_ms, hb.interval_ms
            )));
        }
        if hb.max_missed == 0 {
            return Err(Error::config("heartbeat max_missed must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
