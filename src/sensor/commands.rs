//! Command channel.
//!
//! Lines arriving here are forwarded verbatim to the sensor UART. No
//! validation is performed; the sensor answers unknown commands itself.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bound on console lines waiting for the bridge loop.
const CONSOLE_QUEUE: usize = 16;

/// Non-blocking source of sensor commands.
pub trait CommandSource {
    /// Returns the next pending command line, if any.
    fn poll_command(&mut self) -> Option<String>;
}

/// Commands typed on the local console.
///
/// A background task reads stdin and hands complete lines over a bounded
/// queue, so the bridge loop only ever does a `try_recv`.
pub struct ConsoleCommands {
    rx: mpsc::Receiver<String>,
}

impl ConsoleCommands {
    /// Starts reading stdin. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn_stdin() -> Self {
        let (tx, commands) = Self::channel(CONSOLE_QUEUE);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Console read failed");
                        break;
                    }
                }
            }
        });

        commands
    }

    /// Creates a command source fed by the returned sender.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

impl CommandSource for ConsoleCommands {
    fn poll_command(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
