//! In-memory sensor port.
//!
//! Serves pre-recorded bytes in fixed-size chunks and records every command
//! written back. Used for `--replay` runs without hardware and by tests.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

use super::SensorPort;

/// Default number of bytes released per read.
const DEFAULT_CHUNK: usize = 64;

/// Sensor port backed by a byte queue.
///
/// Clones share the same queue, so a test can keep a handle and inject
/// bytes after the port has been moved into the bridge.
#[derive(Clone)]
pub struct ScriptedSensor {
    inner: Arc<Mutex<ScriptedInner>>,
}

struct ScriptedInner {
    pending: VecDeque<u8>,
    chunk: usize,
    written: Vec<String>,
}

impl ScriptedSensor {
    /// Creates an empty port.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedInner {
                pending: VecDeque::new(),
                chunk: DEFAULT_CHUNK,
                written: Vec::new(),
            })),
        }
    }

    /// Creates a port preloaded with `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let sensor = Self::new();
        sensor.push(bytes);
        sensor
    }

    /// Creates a port that replays a recorded frame log.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    /// Limits how many bytes one read may return.
    #[must_use]
    pub fn with_chunk_size(self, chunk: usize) -> Self {
        self.inner.lock().chunk = chunk.max(1);
        self
    }

    /// Appends bytes for later reads.
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        self.inner.lock().pending.extend(bytes.as_ref());
    }

    /// Number of bytes not yet read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Commands written to the sensor so far.
    #[must_use]
    pub fn written(&self) -> Vec<String> {
        self.inner.lock().written.clone()
    }
}

impl Default for ScriptedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPort for ScriptedSensor {
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let n = inner.pending.len().min(buffer.len()).min(inner.chunk);

        for (slot, byte) in buffer.iter_mut().zip(inner.pending.drain(..n)) {
            *slot = byte;
        }

        Ok(n)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.lock().written.push(line.to_string());
        Ok(())
    }
}
