//! Typed results of frame parsing.

use serde::{Deserialize, Serialize};

/// One presence/motion/distance sample from the sensor.
///
/// Values are kept exactly as the sensor reported them: a frame claiming
/// motion without presence is passed through unchanged. Use
/// [`SensorReading::is_consistent`] to detect such frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Someone is in range.
    pub presence: bool,
    /// The target is moving.
    pub motion: bool,
    /// Distance to the target in centimeters.
    pub distance_cm: u32,
    /// Milliseconds since boot when the frame was parsed.
    pub observed_at_ms: u64,
}

impl SensorReading {
    /// Creates a reading.
    #[inline]
    #[must_use]
    pub const fn new(presence: bool, motion: bool, distance_cm: u32, observed_at_ms: u64) -> Self {
        Self {
            presence,
            motion,
            distance_cm,
            observed_at_ms,
        }
    }

    /// Returns `false` when the frame reports motion without presence.
    #[inline]
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        !self.motion || self.presence
    }

    /// Absolute distance difference to another reading.
    #[inline]
    #[must_use]
    pub const fn distance_delta(&self, other: &Self) -> u32 {
        self.distance_cm.abs_diff(other.distance_cm)
    }
}

/// What the pipeline hands to the envelope encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// Parsed structured frame.
    Reading(SensorReading),
    /// Passthrough line, untouched.
    Raw {
        /// The sensor line.
        line: String,
        /// Milliseconds since boot when the line was read.
        observed_at_ms: u64,
    },
}

impl Publication {
    /// Returns the reading, if this is a structured publication.
    #[inline]
    #[must_use]
    pub fn reading(&self) -> Option<&SensorReading> {
        match self {
            Self::Reading(reading) => Some(reading),
            Self::Raw { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency() {
        assert!(SensorReading::new(true, true, 10, 0).is_consistent());
        assert!(SensorReading::new(true, false, 10, 0).is_consistent());
        assert!(SensorReading::new(false, false, 0, 0).is_consistent());
        assert!(!SensorReading::new(false, true, 0, 0).is_consistent());
    }

    #[test]
    fn test_distance_delta_is_symmetric() {
        let near = SensorReading::new(true, false, 40, 0);
        let far = SensorReading::new(true, false, 51, 0);
        assert_eq!(near.distance_delta(&far), 11);
        assert_eq!(far.distance_delta(&near), 11);
    }
}
