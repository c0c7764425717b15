//! Wire envelopes sent to network peers.
//!
//! # Format
//!
//! Structured mode:
//!
//! ```json
//! {"sensorId":"sensor1","presence":1,"motion":0,"distance":45,"timestamp":1234}
//! ```
//!
//! Passthrough mode:
//!
//! ```json
//! {"sensorId":"sensor1","raw":"leapMMW:/> \"quoted\""}
//! ```
//!
//! Flags go out as `0`/`1`. `timestamp` is milliseconds since boot, not
//! wall-clock time. Raw lines are JSON-escaped, so every envelope is valid
//! JSON whatever the sensor sends.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str, to_string};
use tracing::error;

use crate::error::Result;
use crate::frame::{Publication, SensorReading};

// ============================================================================
// Envelope
// ============================================================================

/// One message on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Parsed sensor reading.
    Reading(ReadingEnvelope),
    /// Untouched sensor line.
    Raw(RawEnvelope),
}

/// Structured-mode payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadingEnvelope {
    /// Deployment sensor identifier.
    pub sensor_id: String,
    /// Presence flag.
    #[serde(with = "flag")]
    pub presence: bool,
    /// Motion flag.
    #[serde(with = "flag")]
    pub motion: bool,
    /// Distance in centimeters.
    pub distance: u32,
    /// Milliseconds since boot.
    pub timestamp: u64,
}

/// Passthrough-mode payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawEnvelope {
    /// Deployment sensor identifier.
    pub sensor_id: String,
    /// The sensor line as read.
    pub raw: String,
}

impl Envelope {
    /// Creates a structured envelope.
    #[must_use]
    pub fn reading(sensor_id: impl Into<String>, reading: &SensorReading) -> Self {
        Self::Reading(ReadingEnvelope {
            sensor_id: sensor_id.into(),
            presence: reading.presence,
            motion: reading.motion,
            distance: reading.distance_cm,
            timestamp: reading.observed_at_ms,
        })
    }

    /// Creates a passthrough envelope.
    #[must_use]
    pub fn raw(sensor_id: impl Into<String>, line: impl Into<String>) -> Self {
        Self::Raw(RawEnvelope {
            sensor_id: sensor_id.into(),
            raw: line.into(),
        })
    }

    /// Creates the envelope matching a publication.
    #[must_use]
    pub fn from_publication(sensor_id: impl Into<String>, publication: &Publication) -> Self {
        match publication {
            Publication::Reading(reading) => Self::reading(sensor_id, reading),
            Publication::Raw { line, .. } => Self::raw(sensor_id, line.as_str()),
        }
    }

    /// Returns the sensor identifier.
    #[must_use]
    pub fn sensor_id(&self) -> &str {
        match self {
            Self::Reading(envelope) => &envelope.sensor_id,
            Self::Raw(envelope) => &envelope.sensor_id,
        }
    }

    /// Serializes the envelope to JSON text.
    ///
    /// Never fails: should serialization ever error, a minimal envelope
    /// carrying only the sensor identifier is returned instead.
    #[must_use]
    pub fn encode(&self) -> String {
        match to_string(self) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Envelope serialization failed");
                format!(
                    "{{\"sensorId\":{}}}",
                    Value::String(self.sensor_id().to_string())
                )
            }
        }
    }

    /// Parses envelope text received from the data channel.
    ///
    /// Flags are accepted as `0`/`1` or as JSON booleans.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the text is not an envelope.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }
}

// ============================================================================
// Flag Encoding
// ============================================================================

/// `bool` as `0`/`1` on the wire.
mod flag {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireFlag {
        Int(u64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match WireFlag::deserialize(deserializer)? {
            WireFlag::Int(0) | WireFlag::Bool(false) => Ok(false),
            WireFlag::Int(1) | WireFlag::Bool(true) => Ok(true),
            WireFlag::Int(other) => Err(D::Error::custom(format!(
                "flag must be 0 or 1, got {other}"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
