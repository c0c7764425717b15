//! Line extraction from the raw sensor byte stream.
//!
//! The reader turns an unbounded, possibly garbled byte stream into
//! `\n`-terminated lines, one per poll, without ever blocking and without
//! buffering more than one capped line.
//!
//! # Line Rules
//!
//! | Input | Result |
//! |-------|--------|
//! | Bytes without `\n` | Kept for the next poll |
//! | `...\r\n` | Line with trailing whitespace and `\r` trimmed |
//! | Blank line | Skipped |
//! | Line longer than the cap | First `max_len` bytes, flagged truncated; rest of the line discarded |
//! | Invalid UTF-8 | Replaced with U+FFFD |

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

use crate::error::Result;
use crate::sensor::SensorPort;

// ============================================================================
// Constants
// ============================================================================

/// Bytes pulled from the source per read.
const READ_CHUNK: usize = 64;

// ============================================================================
// RawLine
// ============================================================================

/// One line from the sensor, terminator and trailing whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    text: String,
    truncated: bool,
}

impl RawLine {
    /// Creates a complete (not truncated) line.
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }

    /// Creates a line that hit the length cap.
    #[inline]
    #[must_use]
    pub fn truncated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: true,
        }
    }

    /// Returns the line text.
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns `true` if the line was cut at the length cap.
    #[inline]
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Consumes the line, returning its text.
    #[inline]
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

// ============================================================================
// FrameReader
// ============================================================================

/// Non-blocking line reader over a [`SensorPort`].
pub struct FrameReader<S> {
    /// Underlying byte source.
    source: S,
    /// Bytes of the line being assembled (plus any read-ahead).
    pending: Vec<u8>,
    /// Line length cap in bytes.
    max_len: usize,
    /// Dropping the tail of an over-long line until the next `\n`.
    discarding: bool,
    /// Read buffer.
    scratch: [u8; READ_CHUNK],
}

impl<S: SensorPort> FrameReader<S> {
    /// Creates a reader with the given line cap.
    #[must_use]
    pub fn new(source: S, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            source,
            pending: Vec::with_capacity(max_len + READ_CHUNK),
            max_len,
            discarding: false,
            scratch: [0u8; READ_CHUNK],
        }
    }

    /// Returns the next complete line, or `None` if none is available yet.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the source. Buffered bytes are kept, so
    /// the next poll resumes where this one stopped.
    pub fn poll_line(&mut self) -> Result<Option<RawLine>> {
        loop {
            if let Some(line) = self.take_buffered() {
                return Ok(Some(line));
            }

            let n = self.source.read_available(&mut self.scratch)?;
            if n == 0 {
                return Ok(None);
            }

            self.absorb(n);
        }
    }

    /// Returns the number of buffered bytes not yet returned as a line.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Returns the line cap.
    #[inline]
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns the underlying source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the underlying source mutably (used to write commands).
    #[inline]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Moves `n` freshly read bytes from scratch into the line buffer.
    fn absorb(&mut self, n: usize) {
        let mut chunk = &self.scratch[..n];

        if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return,
            }
        }

        self.pending.extend_from_slice(chunk);
    }

    /// Cuts the next line out of the buffer, if one is complete or over-long.
    fn take_buffered(&mut self) -> Option<RawLine> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let body = &raw[..pos];

                let line = if body.len() > self.max_len {
                    Self::finish(&body[..self.max_len], true)
                } else {
                    Self::finish(body, false)
                };

                match line {
                    Some(line) => return Some(line),
                    None => continue,
                }
            }

            if self.pending.len() > self.max_len {
                let raw: Vec<u8> = self.pending.drain(..).collect();
                self.discarding = true;
                trace!(cap = self.max_len, "Sensor line over cap, truncating");
                if let Some(line) = Self::finish(&raw[..self.max_len], true) {
                    return Some(line);
                }
                continue;
            }

            return None;
        }
    }

    /// Decodes and trims one line; blank lines yield `None`.
    fn finish(bytes: &[u8], truncated: bool) -> Option<RawLine> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end();
        if text.is_empty() {
            return None;
        }

        Some(RawLine {
            text: text.to_string(),
            truncated,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::sensor::ScriptedSensor;

    fn reader(bytes: &[u8], cap: usize) -> (ScriptedSensor, FrameReader<ScriptedSensor>) {
        let handle = ScriptedSensor::from_bytes(bytes);
        (handle.clone(), FrameReader::new(handle, cap))
    }

    #[test]
    fn test_no_line_until_terminator() {
        let (handle, mut reader) = reader(b"$JYBSS,1,0", 64);

        assert_eq!(reader.poll_line().unwrap(), None);
        assert_eq!(reader.buffered(), 10);

        handle.push(b",45,0\r\n");
        let line = reader.poll_line().unwrap().expect("line should be complete");
        assert_eq!(line.text(), "$JYBSS,1,0,45,0");
        assert!(!line.is_truncated());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_one_line_per_poll() {
        let (_, mut reader) = reader(b"first\nsecond\nthird\n", 64);

        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "first");
        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "second");
        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "third");
        assert_eq!(reader.poll_line().unwrap(), None);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let (_, mut reader) = reader(b"\r\n   \n\nvalue\n", 64);
        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "value");
        assert_eq!(reader.poll_line().unwrap(), None);
    }

    #[test]
    fn test_trailing_whitespace_trimmed_leading_kept() {
        let (_, mut reader) = reader(b"  $JYBSS,0,0,0,0 \t\r\n", 64);
        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "  $JYBSS,0,0,0,0");
    }

    #[test]
    fn test_overlong_line_truncated_and_tail_discarded() {
        let mut bytes = vec![b'x'; 100];
        bytes.extend_from_slice(b"\nnext\n");
        let (_, mut reader) = reader(&bytes, 32);

        let line = reader.poll_line().unwrap().unwrap();
        assert!(line.is_truncated());
        assert_eq!(line.text().len(), 32);

        let next = reader.poll_line().unwrap().unwrap();
        assert_eq!(next.text(), "next");
        assert!(!next.is_truncated());
    }

    #[test]
    fn test_overlong_line_without_terminator_stays_bounded() {
        let (handle, mut reader) = reader(&[b'y'; 40], 16);
        let handle = handle.with_chunk_size(8);

        let line = reader.poll_line().unwrap().unwrap();
        assert!(line.is_truncated());
        assert!(reader.buffered() <= 16 + READ_CHUNK);

        // Tail of the same line keeps getting dropped.
        assert_eq!(reader.poll_line().unwrap(), None);
        handle.push(b"yyyy\nok\n");
        assert_eq!(reader.poll_line().unwrap().unwrap().text(), "ok");
    }

    #[test]
    fn test_exact_cap_is_not_truncated() {
        let mut bytes = vec![b'z'; 16];
        bytes.push(b'\n');
        let (_, mut reader) = reader(&bytes, 16);

        let line = reader.poll_line().unwrap().unwrap();
        assert!(!line.is_truncated());
        assert_eq!(line.text().len(), 16);
    }

    #[test]
    fn test_garbled_bytes_are_lossy() {
        let (_, mut reader) = reader(b"\xff\xfe$JYBSS\n", 64);
        let line = reader.poll_line().unwrap().unwrap();
        assert!(line.text().ends_with("$JYBSS"));
        assert!(line.text().contains('\u{FFFD}'));
    }

    #[test]
    fn test_source_mut_writes_commands() {
        let (handle, mut reader) = reader(b"", 64);
        reader.source_mut().write_line("getVersion").unwrap();
        assert_eq!(handle.written(), vec!["getVersion".to_string()]);
    }
}
