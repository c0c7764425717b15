//! Sensor line grammars.
//!
//! # Structured Frames
//!
//! ```text
//! $JYBSS,<presence>,<motion>,<distance>,<reserved>[,...]
//! ```
//!
//! | Field | Rule |
//! |-------|------|
//! | header | Must be exactly `$JYBSS` |
//! | presence | `true` only for the literal `1` |
//! | motion | `true` only for the literal `1` |
//! | distance | Leading integer, `0` when not numeric, negatives clamp to `0` |
//! | reserved | Must be present, content ignored |
//!
//! Lines that do not start with `$JYBSS` are the sensor's diagnostic
//! chatter and are [`ParseError::Ignored`], never malformed.

// ============================================================================
// Imports
// ============================================================================

use thiserror::Error;

use crate::config::ParseMode;

use super::reader::RawLine;
use super::reading::{Publication, SensorReading};

// ============================================================================
// Constants
// ============================================================================

/// Header of a structured sensor frame.
pub const STRUCTURED_PREFIX: &str = "$JYBSS";

/// Fields required after the header.
const REQUIRED_FIELDS: usize = 4;

// ============================================================================
// ParseError
// ============================================================================

/// Why a line produced no publication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line does not belong to the active grammar. Not an error condition.
    #[error("line ignored")]
    Ignored,

    /// Line carries the frame header but its structure is broken.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong with the frame.
        reason: String,
    },
}

impl ParseError {
    #[inline]
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    /// Returns `true` for lines outside the grammar.
    #[inline]
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }

    /// Returns `true` for broken frames.
    #[inline]
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }
}

// ============================================================================
// FrameParser
// ============================================================================

/// Applies the deployment's grammar to sensor lines.
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    mode: ParseMode,
}

impl FrameParser {
    /// Creates a parser for the given grammar.
    #[inline]
    #[must_use]
    pub const fn new(mode: ParseMode) -> Self {
        Self { mode }
    }

    /// Returns the active grammar.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Parses one line read at `now_ms`.
    ///
    /// Passthrough mode always succeeds, truncated lines included.
    ///
    /// # Errors
    ///
    /// - [`ParseError::Ignored`] if a structured-mode line lacks the header
    /// - [`ParseError::MalformedFrame`] if a headed line is broken or was truncated
    pub fn parse(&self, line: &RawLine, now_ms: u64) -> Result<Publication, ParseError> {
        match self.mode {
            ParseMode::Passthrough => Ok(Publication::Raw {
                line: line.text().to_string(),
                observed_at_ms: now_ms,
            }),
            ParseMode::Structured => {
                let text = line.text();
                if line.is_truncated() && text.starts_with(STRUCTURED_PREFIX) {
                    return Err(ParseError::malformed("frame exceeded the line length cap"));
                }
                parse_structured(text, now_ms).map(Publication::Reading)
            }
        }
    }
}

// ============================================================================
// Structured Grammar
// ============================================================================

/// Parses a `$JYBSS` frame into a reading.
///
/// # Errors
///
/// See [`FrameParser::parse`].
pub fn parse_structured(text: &str, now_ms: u64) -> Result<SensorReading, ParseError> {
    if !text.starts_with(STRUCTURED_PREFIX) {
        return Err(ParseError::Ignored);
    }

    let mut fields = text.split(',');

    let header = fields.next().unwrap_or_default();
    if header != STRUCTURED_PREFIX {
        return Err(ParseError::malformed(format!(
            "unexpected header {header:?}"
        )));
    }

    let (Some(presence), Some(motion), Some(distance), Some(_reserved)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ParseError::malformed(format!(
            "expected at least {REQUIRED_FIELDS} fields after {STRUCTURED_PREFIX}, got {}",
            text.matches(',').count()
        )));
    };

    Ok(SensorReading::new(
        presence == "1",
        motion == "1",
        parse_distance(distance),
        now_ms,
    ))
}

/// Best-effort integer parse of the distance field.
///
/// Reads an optional sign and the leading digits after any leading
/// whitespace, stopping at the first other character. A field with no
/// leading digits is `0`. Negative values clamp to `0`, overflow saturates.
#[must_use]
pub fn parse_distance(field: &str) -> u32 {
    let field = field.trim_start();

    let (negative, digits) = match field.as_bytes().first() {
        Some(b'-') => (true, &field[1..]),
        Some(b'+') => (false, &field[1..]),
        _ => (false, field),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u32, |acc, b| {
            acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
        });

    if negative { 0 } else { value }
}

// ============================================================================
// Tests
// ============================================================================
