//! UART sensor port.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::Result;

use super::SensorPort;

/// Line terminator the sensor expects on commands.
const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// Read timeout; only reached if the driver under-reports pending bytes.
const READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Sensor attached to a serial port, 8 data bits, no parity, 1 stop bit.
pub struct SerialSensor {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialSensor {
    /// Opens the serial port.
    ///
    /// # Arguments
    /// * `path` - Serial device (e.g. "/dev/ttyAMA0")
    /// * `baud_rate` - Baud rate (the SEN0395 default is 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()?;

        info!(path, baud_rate, "Sensor serial port opened");

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// Returns the device path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl SensorPort for SerialSensor {
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 || buffer.is_empty() {
            return Ok(0);
        }

        let want = pending.min(buffer.len());
        match self.port.read(&mut buffer[..want]) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(COMMAND_TERMINATOR)?;
        self.port.flush()?;
        debug!(path = %self.path, command = line, "Command written to sensor");
        Ok(())
    }
}
