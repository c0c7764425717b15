//! In-memory transport for manager and bridge tests.
//!
//! Clones share state, so a test can box one clone into the manager and keep
//! another to inject events and inspect what was sent.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::{CloseReason, Transport, TransportEvent};

#[derive(Debug, Default)]
struct MockState {
    events: VecDeque<TransportEvent>,
    sent: Vec<(PeerId, String)>,
    pings: Vec<PeerId>,
    closed: Vec<PeerId>,
    rejected: Vec<(PeerId, CloseReason)>,
    connects: Vec<PeerId>,
    failing: FxHashSet<PeerId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Queues `Opened` for a fresh peer and returns it.
    pub fn open_peer(&self) -> PeerId {
        let peer = PeerId::next();
        self.push_event(TransportEvent::Opened { peer, remote: None });
        peer
    }

    /// Makes every later send or ping to `peer` fail.
    pub fn fail_sends_to(&self, peer: PeerId) {
        self.state.lock().failing.insert(peer);
    }

    pub fn sent_to(&self, peer: PeerId) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(to, _)| *to == peer)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn pings(&self) -> Vec<PeerId> {
        self.state.lock().pings.clone()
    }

    pub fn closed(&self) -> Vec<PeerId> {
        self.state.lock().closed.clone()
    }

    pub fn rejected(&self) -> Vec<(PeerId, CloseReason)> {
        self.state.lock().rejected.clone()
    }

    pub fn connects(&self) -> Vec<PeerId> {
        self.state.lock().connects.clone()
    }
}

impl Transport for MockTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.state.lock().events.pop_front()
    }

    fn send_text(&mut self, peer: PeerId, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(&peer) {
            return Err(Error::send_failed(peer, "mock failure"));
        }
        state.sent.push((peer, text.to_owned()));
        Ok(())
    }

    fn ping(&mut self, peer: PeerId) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.contains(&peer) {
            return Err(Error::send_failed(peer, "mock failure"));
        }
        state.pings.push(peer);
        Ok(())
    }

    fn close(&mut self, peer: PeerId) {
        self.state.lock().closed.push(peer);
    }

    fn reject(&mut self, peer: PeerId, reason: CloseReason) {
        self.state.lock().rejected.push((peer, reason));
    }

    fn connect(&mut self) -> Result<PeerId> {
        let peer = PeerId::next();
        self.state.lock().connects.push(peer);
        Ok(peer)
    }
}
