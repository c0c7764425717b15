//! Per-peer socket task.
//!
//! Each WebSocket connection is driven by one tokio task that owns the stream.
//! The bridge loop talks to it through a [`PeerHandle`], and the task reports
//! back through the shared [`TransportEvent`] queue.
//!
//! # Event Loop
//!
//! The task selects over:
//!
//! - incoming frames from the remote end (text, pong, close, errors)
//! - outgoing commands from the handle (text, ping, close)
//!
//! Whatever ends the loop, the last thing the task does is emit
//! [`TransportEvent::Closed`].

// ============================================================================
// Imports
// ============================================================================

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::{CloseReason, PEER_QUEUE_CAPACITY, TransportEvent};

// ============================================================================
// PeerCommand
// ============================================================================

/// Commands for a peer task.
#[derive(Debug)]
pub(crate) enum PeerCommand {
    /// Send a text frame.
    Text(String),
    /// Send a ping frame.
    Ping,
    /// Send a close frame and stop.
    Close(Option<CloseReason>),
}

// ============================================================================
// PeerHandle
// ============================================================================

/// Sending side of one peer's outgoing queue.
///
/// Dropping the last handle makes the task close the socket.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    peer: PeerId,
    tx: mpsc::Sender<PeerCommand>,
}

impl PeerHandle {
    /// Creates a handle and the queue its task will drain.
    pub(crate) fn channel(peer: PeerId) -> (Self, mpsc::Receiver<PeerCommand>) {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
        (Self { peer, tx }, rx)
    }

    /// Returns the peer this handle belongs to.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailed`] if the queue is full or the task is gone.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.enqueue(PeerCommand::Text(text.to_owned()))
    }

    /// Queues a ping frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailed`] if the queue is full or the task is gone.
    pub fn ping(&self) -> Result<()> {
        self.enqueue(PeerCommand::Ping)
    }

    /// Asks the task to close the socket.
    ///
    /// If the queue is full the request is dropped; the socket still closes
    /// once every handle is dropped.
    pub fn close(&self, reason: Option<CloseReason>) {
        if self.tx.try_send(PeerCommand::Close(reason)).is_err() {
            trace!(peer = %self.peer, "Close request not queued");
        }
    }

    fn enqueue(&self, command: PeerCommand) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => Error::send_failed(self.peer, "outgoing queue full"),
            TrySendError::Closed(_) => Error::send_failed(self.peer, "connection closed"),
        })
    }
}

// ============================================================================
// Peer Task
// ============================================================================

/// Drives one WebSocket until either side closes it.
pub(crate) async fn run_peer<S>(
    peer: PeerId,
    ws_stream: WebSocketStream<S>,
    mut commands: mpsc::Receiver<PeerCommand>,
    events: mpsc::Sender<TransportEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the remote end
            message = ws_read.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(%peer, len = text.len(), "Text frame received");
                        TransportEvent::Text {
                            peer,
                            text: text.as_str().to_owned(),
                        }
                    }

                    Some(Ok(Message::Pong(_))) => TransportEvent::Pong { peer },

                    Some(Ok(Message::Close(frame))) => {
                        debug!(%peer, ?frame, "WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(%peer, error = %e, "WebSocket error");
                        let _ = events
                            .send(TransportEvent::Error { peer, message: e.to_string() })
                            .await;
                        break;
                    }

                    None => {
                        debug!(%peer, "WebSocket stream ended");
                        break;
                    }

                    // Binary is not part of the protocol; pings are answered by tungstenite
                    Some(Ok(_)) => continue,
                };

                if events.send(event).await.is_err() {
                    debug!(%peer, "Event queue closed");
                    break;
                }
            }

            // Commands from the bridge loop
            command = commands.recv() => {
                let message = match command {
                    Some(PeerCommand::Text(text)) => Message::Text(text.into()),
                    Some(PeerCommand::Ping) => Message::Ping(Default::default()),
                    Some(PeerCommand::Close(reason)) => {
                        let frame = reason.map(|reason| CloseFrame {
                            code: CloseCode::from(reason.code),
                            reason: reason.reason.into(),
                        });
                        let _ = ws_write.send(Message::Close(frame)).await;
                        debug!(%peer, ?reason, "WebSocket closed locally");
                        break;
                    }
                    None => {
                        let _ = ws_write.close().await;
                        debug!(%peer, "Peer handle dropped");
                        break;
                    }
                };

                if let Err(e) = ws_write.send(message).await {
                    warn!(%peer, error = %e, "WebSocket write failed");
                    let _ = events
                        .send(TransportEvent::Error { peer, message: e.to_string() })
                        .await;
                    break;
                }
            }
        }
    }

    let _ = events.send(TransportEvent::Closed { peer }).await;
    debug!(%peer, "Peer task terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{DuplexStream, duplex};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::transport::CAPACITY_EXCEEDED;

    const WAIT: Duration = Duration::from_secs(2);

    async fn spawn_pair() -> (
        PeerHandle,
        WebSocketStream<DuplexStream>,
        mpsc::Receiver<TransportEvent>,
    ) {
        let (local, remote) = duplex(4096);
        let local = WebSocketStream::from_raw_socket(local, Role::Server, None).await;
        let remote = WebSocketStream::from_raw_socket(remote, Role::Client, None).await;

        let peer = PeerId::next();
        let (handle, commands) = PeerHandle::channel(peer);
        let (events_tx, events_rx) = mpsc::channel(16);
        tokio::spawn(run_peer(peer, local, commands, events_tx));

        (handle, remote, events_rx)
    }

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("queue open")
    }

    #[tokio::test]
    async fn test_text_both_directions() {
        let (handle, mut remote, mut events) = spawn_pair().await;

        remote.send(Message::Text("sensorStart".into())).await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Text {
                peer: handle.peer(),
                text: "sensorStart".into()
            }
        );

        handle.send_text(r#"{"sensorId":"sensor1","raw":"Done"}"#).unwrap();
        let message = timeout(WAIT, remote.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(
            message,
            Message::Text(r#"{"sensorId":"sensor1","raw":"Done"}"#.into())
        );
    }

    #[tokio::test]
    async fn test_ping_reports_pong() {
        let (handle, mut remote, mut events) = spawn_pair().await;

        handle.ping().unwrap();
        let message = timeout(WAIT, remote.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(message, Message::Ping(_)));
        remote.flush().await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Pong {
                peer: handle.peer()
            }
        );
    }

    #[tokio::test]
    async fn test_close_with_reason() {
        let (handle, mut remote, mut events) = spawn_pair().await;

        handle.close(Some(CAPACITY_EXCEEDED));

        let message = timeout(WAIT, remote.next()).await.unwrap().unwrap().unwrap();
        let Message::Close(Some(frame)) = message else {
            panic!("expected close frame, got {message:?}");
        };
        assert_eq!(u16::from(frame.code), 1013);
        assert_eq!(frame.reason.as_str(), "capacity exceeded");

        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Closed {
                peer: handle.peer()
            }
        );
    }

    #[tokio::test]
    async fn test_remote_close_ends_task() {
        let (handle, mut remote, mut events) = spawn_pair().await;
        let peer = handle.peer();

        remote.close(None).await.unwrap();
        assert_eq!(next_event(&mut events).await, TransportEvent::Closed { peer });

        // Task is gone; sends fail immediately.
        let err = handle.send_text("late").unwrap_err();
        assert!(matches!(err, Error::SendFailed { .. }));
    }

    #[tokio::test]
    async fn test_full_queue_fails_fast() {
        let peer = PeerId::next();
        let (handle, _commands) = PeerHandle::channel(peer);

        for _ in 0..PEER_QUEUE_CAPACITY {
            handle.send_text("x").unwrap();
        }
        let err = handle.send_text("overflow").unwrap_err();
        assert_eq!(err.to_string(), format!("Send to peer {peer} failed: outgoing queue full"));
    }
}
