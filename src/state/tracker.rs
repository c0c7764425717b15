//! Change detection for sensor readings.
//!
//! A reading is published only when it differs meaningfully from the last
//! one that was published:
//!
//! | Condition | Reason |
//! |-----------|--------|
//! | Nothing published yet | [`PublishReason::First`] |
//! | `presence` flipped | [`PublishReason::PresenceChanged`] |
//! | `motion` flipped | [`PublishReason::MotionChanged`] |
//! | `|Δdistance| > hysteresis` | [`PublishReason::DistanceMoved`] |
//!
//! Everything else is dropped silently. The comparison is always against the
//! last *published* reading, so slow drift still publishes once it
//! accumulates past the threshold.

use crate::frame::SensorReading;

/// Default distance hysteresis in centimeters.
pub const DEFAULT_HYSTERESIS_CM: u32 = 10;

/// Why a reading was considered significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishReason {
    /// First reading since start-up (or reset).
    First,
    /// Presence flag differs from the last publish.
    PresenceChanged,
    /// Motion flag differs from the last publish.
    MotionChanged,
    /// Distance moved past the hysteresis threshold.
    DistanceMoved {
        /// Absolute change in centimeters.
        delta_cm: u32,
    },
}

/// A reading that passed the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishableEvent {
    /// The reading to publish.
    pub reading: SensorReading,
    /// Which rule let it through.
    pub reason: PublishReason,
}

/// Holds the last published reading and filters new ones against it.
#[derive(Debug, Clone)]
pub struct StateTracker {
    hysteresis_cm: u32,
    last_published: Option<SensorReading>,
    last_published_at_ms: u64,
}

impl StateTracker {
    /// Creates a tracker with the given distance hysteresis.
    #[must_use]
    pub const fn new(hysteresis_cm: u32) -> Self {
        Self {
            hysteresis_cm,
            last_published: None,
            last_published_at_ms: 0,
        }
    }

    /// Filters one reading.
    ///
    /// Returns the event to publish, or `None` if the reading is not
    /// significant. On publish the reading becomes the new reference.
    pub fn observe(&mut self, reading: SensorReading) -> Option<PublishableEvent> {
        let reason = self.classify(&reading)?;

        self.last_published = Some(reading);
        self.last_published_at_ms = reading.observed_at_ms;

        Some(PublishableEvent { reading, reason })
    }

    fn classify(&self, reading: &SensorReading) -> Option<PublishReason> {
        let Some(last) = self.last_published.as_ref() else {
            return Some(PublishReason::First);
        };

        if reading.presence != last.presence {
            return Some(PublishReason::PresenceChanged);
        }
        if reading.motion != last.motion {
            return Some(PublishReason::MotionChanged);
        }

        let delta_cm = reading.distance_delta(last);
        (delta_cm > self.hysteresis_cm).then_some(PublishReason::DistanceMoved { delta_cm })
    }

    /// Last published reading, if any.
    #[inline]
    #[must_use]
    pub fn last_published(&self) -> Option<&SensorReading> {
        self.last_published.as_ref()
    }

    /// Timestamp of the last publish (ms since boot), `0` before the first.
    #[inline]
    #[must_use]
    pub fn last_published_at_ms(&self) -> u64 {
        self.last_published_at_ms
    }

    /// Distance hysteresis in centimeters.
    #[inline]
    #[must_use]
    pub fn hysteresis_cm(&self) -> u32 {
        self.hysteresis_cm
    }

    /// Forgets the last publish; the next reading publishes unconditionally.
    pub fn reset(&mut self) {
        self.last_published = None;
        self.last_published_at_ms = 0;
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HYSTERESIS_CM)
    }
}
