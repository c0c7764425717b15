//! The bridge loop.
//!
//! [`Bridge`] owns every piece of the pipeline and advances it one
//! non-blocking step per [`tick`](Bridge::tick):
//!
//! ```text
//!  1. manager.service()  ──►  LinkEvents (snapshots, upstream commands)
//!  2. sensor line        ──►  parse ──► filter ──► encode ──► publish
//!  3. console command    ──►  sensor
//! ```
//!
//! [`run`](Bridge::run) repeats the tick with a fixed yield until shutdown.
//! Nothing inside a tick waits on I/O.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::config::{BridgeConfig, ParseMode};
use crate::frame::{FrameParser, FrameReader, ParseError, Publication, RawLine};
use crate::identifiers::ClientId;
use crate::link::{ConnectionManager, LinkEvent};
use crate::protocol::Envelope;
use crate::sensor::{CommandSource, SensorPort};
use crate::state::{BridgeState, BridgeStats};

// ============================================================================
// TickOutcome
// ============================================================================

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// A sensor line was consumed.
    pub line_read: bool,
    /// Destinations reached by a new publication; `None` if nothing was published.
    pub delivered: Option<usize>,
    /// Commands written to the sensor.
    pub commands_forwarded: usize,
}

impl TickOutcome {
    /// Returns `true` if the tick found nothing to do.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.line_read && self.commands_forwarded == 0
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Sensor-to-network bridge.
///
/// # Example
///
/// ```ignore
/// let sensor = SerialSensor::open(&config.serial_path, config.baud_rate)?;
/// let server = WsServer::bind(config.bind_addr).await?;
/// let manager = ConnectionManager::server(Box::new(server), &config);
///
/// let mut bridge = Bridge::new(&config, sensor, manager);
/// bridge.set_network_ready(true);
/// bridge.run(tokio::signal::ctrl_c().map(|_| ())).await;
/// ```
pub struct Bridge<S: SensorPort> {
    sensor_id: String,
    reader: FrameReader<S>,
    parser: FrameParser,
    state: BridgeState,
    manager: ConnectionManager,
    commands: Option<Box<dyn CommandSource>>,
    loop_yield: Duration,
    started_at: Instant,
}

// ============================================================================
// Bridge - Constructor
// ============================================================================

impl<S: SensorPort> Bridge<S> {
    /// Assembles a bridge. The network starts out not ready.
    #[must_use]
    pub fn new(config: &BridgeConfig, sensor: S, manager: ConnectionManager) -> Self {
        Self {
            sensor_id: config.sensor_id.clone(),
            reader: FrameReader::new(sensor, config.max_line_len),
            parser: FrameParser::new(config.mode),
            state: BridgeState::new(config.hysteresis_cm),
            manager,
            commands: None,
            loop_yield: Duration::from_millis(config.loop_yield_ms),
            started_at: Instant::now(),
        }
    }

    /// Adds a local command source.
    #[must_use]
    pub fn with_commands(mut self, commands: Box<dyn CommandSource>) -> Self {
        self.commands = Some(commands);
        self
    }
}

// ============================================================================
// Bridge - Public API
// ============================================================================

impl<S: SensorPort> Bridge<S> {
    /// Sensor identifier stamped on every envelope.
    #[inline]
    #[must_use]
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Diagnostic counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.state.stats
    }

    /// Loop state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    /// The connection manager.
    #[inline]
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Returns `true` when readings are filtered and snapshotted.
    #[inline]
    #[must_use]
    pub fn is_structured(&self) -> bool {
        self.parser.mode() == ParseMode::Structured
    }

    /// The sensor port.
    #[inline]
    #[must_use]
    pub fn sensor(&self) -> &S {
        self.reader.source()
    }

    /// Records whether the network is up.
    ///
    /// In client role a `false → true` change triggers an immediate connect.
    pub fn set_network_ready(&mut self, ready: bool) {
        if self.state.network_ready != ready {
            info!(ready, "Network readiness changed");
        }
        self.state.network_ready = ready;
    }

    /// Forgets the last publication; the next reading publishes unconditionally.
    pub fn reset_state(&mut self) {
        self.state.tracker.reset();
        info!("Bridge state reset");
    }

    /// Milliseconds since the bridge was created.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Runs one non-blocking pass at time `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        // 1. Network
        let events = self.manager.service(now_ms, self.state.network_ready);
        for event in events {
            if self.handle_link_event(event) {
                outcome.commands_forwarded += 1;
            }
        }

        // 2. Sensor frames
        match self.reader.poll_line() {
            Ok(Some(line)) => {
                outcome.line_read = true;
                outcome.delivered = self.process_line(&line, now_ms);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Sensor read failed"),
        }

        // 3. Local commands
        let command = self.commands.as_mut().and_then(|source| source.poll_command());
        if let Some(command) = command
            && self.forward_command(&command)
        {
            outcome.commands_forwarded += 1;
        }

        self.state.stats.send_failures = self.manager.send_failures();
        outcome
    }

    /// Ticks every `loop_yield_ms` until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            sensor_id = %self.sensor_id,
            role = ?self.manager.role(),
            mode = ?self.parser.mode(),
            "Bridge loop started"
        );

        loop {
            let now_ms = self.now_ms();
            self.tick(now_ms);

            tokio::select! {
                () = &mut shutdown => break,
                () = sleep(self.loop_yield) => {}
            }
        }

        info!(stats = ?self.state.stats, "Bridge loop stopped");
    }
}

// ============================================================================
// Bridge - Pipeline
// ============================================================================

impl<S: SensorPort> Bridge<S> {
    /// Returns `true` if a command was forwarded to the sensor.
    fn handle_link_event(&mut self, event: LinkEvent) -> bool {
        match event {
            LinkEvent::ClientJoined(id) => {
                self.send_snapshot(id);
                false
            }
            rejected @ LinkEvent::ClientRejected { .. } => {
                self.state.stats.rejected_clients += 1;
                if let Some(error) = rejected.error() {
                    warn!(%error, total = self.state.stats.rejected_clients, "Client rejected");
                }
                false
            }
            LinkEvent::Command(command) => self.forward_command(&command),
            other @ (LinkEvent::Connected | LinkEvent::Disconnected | LinkEvent::ClientLeft(_)) => {
                trace!(event = ?other, "Link event");
                false
            }
        }
    }

    /// Brings a new client up to date with the last published reading.
    fn send_snapshot(&mut self, id: ClientId) {
        let Some(reading) = self.state.last_published() else {
            return;
        };

        let text = Envelope::reading(self.sensor_id.as_str(), reading).encode();
        match self.manager.send_to(id, &text) {
            Ok(()) => debug!(client = %id, "Snapshot sent"),
            Err(e) if e.is_transport_error() => {
                warn!(client = %id, error = %e, "Snapshot not delivered");
            }
            Err(e) => error!(client = %id, error = %e, "Snapshot send refused"),
        }
    }

    /// Parses, filters and publishes one line.
    fn process_line(&mut self, line: &RawLine, now_ms: u64) -> Option<usize> {
        let stats = &mut self.state.stats;
        stats.lines += 1;
        if line.is_truncated() {
            stats.truncated += 1;
        }

        let publication = match self.parser.parse(line, now_ms) {
            Ok(publication) => publication,
            Err(ParseError::Ignored) => {
                stats.ignored += 1;
                trace!(line = %line.text(), "Line ignored");
                return None;
            }
            Err(ParseError::MalformedFrame { reason }) => {
                stats.malformed += 1;
                debug!(line = %line.text(), %reason, "Malformed frame");
                return None;
            }
        };

        if let Publication::Reading(reading) = &publication {
            if !reading.is_consistent() {
                debug!(?reading, "Frame reports motion without presence");
            }

            let Some(event) = self.state.tracker.observe(*reading) else {
                self.state.stats.suppressed += 1;
                return None;
            };
            trace!(reason = ?event.reason, "Reading is significant");
        }

        let text = Envelope::from_publication(self.sensor_id.as_str(), &publication).encode();
        let delivered = self.manager.publish(&text);
        self.state.stats.published += 1;

        debug!(delivered, mode = ?self.parser.mode(), "Published");
        Some(delivered)
    }

    /// Writes one command line to the sensor.
    fn forward_command(&mut self, command: &str) -> bool {
        match self.reader.source_mut().write_line(command) {
            Ok(()) => {
                self.state.stats.commands_forwarded += 1;
                info!(command, "Command forwarded to sensor");
                true
            }
            Err(e) => {
                warn!(command, error = %e, "Command not delivered to sensor");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Role;
    use crate::identifiers::PeerId;
    use crate::link::LinkState;
    use crate::sensor::{ConsoleCommands, ScriptedSensor};
    use crate::transport::TransportEvent;
    use crate::transport::mock::MockTransport;

    fn server_bridge(config: BridgeConfig) -> (Bridge<ScriptedSensor>, ScriptedSensor, MockTransport) {
        let sensor = ScriptedSensor::new();
        let mock = MockTransport::new();
        let manager = ConnectionManager::server(Box::new(mock.clone()), &config);
        let mut bridge = Bridge::new(&config, sensor.clone(), manager);
        bridge.set_network_ready(true);
        (bridge, sensor, mock)
    }

    fn join(bridge: &mut Bridge<ScriptedSensor>, mock: &MockTransport, now_ms: u64) -> PeerId {
        let peer = mock.open_peer();
        bridge.tick(now_ms);
        peer
    }

    #[test]
    fn test_structured_frame_reaches_every_client() {
        let (mut bridge, sensor, mock) = server_bridge(BridgeConfig::new());
        let a = join(&mut bridge, &mock, 0);
        let b = join(&mut bridge, &mock, 0);

        sensor.push(b"$JYBSS,1,0,45,0\r\n");
        let outcome = bridge.tick(1234);

        assert!(outcome.line_read);
        assert_eq!(outcome.delivered, Some(2));
        let expected =
            r#"{"sensorId":"sensor1","presence":1,"motion":0,"distance":45,"timestamp":1234}"#;
        assert_eq!(mock.sent_to(a), vec![expected.to_string()]);
        assert_eq!(mock.sent_to(b), vec![expected.to_string()]);
    }

    #[test]
    fn test_late_joiner_receives_last_publish() {
        let (mut bridge, sensor, mock) = server_bridge(BridgeConfig::new());

        sensor.push(b"$JYBSS,1,0,45,0\n$JYBSS,0,0,45,0\n$JYBSS,1,1,120,0\n");
        for now in 1..=3 {
            bridge.tick(now);
        }
        assert_eq!(bridge.stats().published, 3);

        let late = join(&mut bridge, &mock, 10);
        let expected =
            r#"{"sensorId":"sensor1","presence":1,"motion":1,"distance":120,"timestamp":3}"#;
        assert_eq!(mock.sent_to(late), vec![expected.to_string()]);
    }

    #[test]
    fn test_no_snapshot_before_first_publish() {
        let (mut bridge, _sensor, mock) = server_bridge(BridgeConfig::new());
        let peer = join(&mut bridge, &mock, 0);
        assert!(mock.sent_to(peer).is_empty());
    }

    #[test]
    fn test_repeated_reading_is_suppressed() {
        let (mut bridge, sensor, mock) = server_bridge(BridgeConfig::new());
        let peer = join(&mut bridge, &mock, 0);

        sensor.push(b"$JYBSS,1,0,45,0\n$JYBSS,1,0,45,0\n$JYBSS,1,0,55,0\n$JYBSS,1,0,56,0\n");
        let outcomes: Vec<_> = (1..=4).map(|now| bridge.tick(now).delivered).collect();

        assert_eq!(outcomes, vec![Some(1), None, None, Some(1)]);
        assert_eq!(mock.sent_to(peer).len(), 2);
        let stats = bridge.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.suppressed, 2);
    }

    #[test]
    fn test_ignored_and_malformed_are_counted() {
        let (mut bridge, sensor, mock) = server_bridge(BridgeConfig::new());
        join(&mut bridge, &mock, 0);

        sensor.push(b"leapMMW:/> sensorStart\n$JYBSS,1,0\n$JYBSS,x,y,12,0\n");
        for now in 1..=3 {
            bridge.tick(now);
        }

        let stats = bridge.stats();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(
            bridge.state().last_published().map(|r| (r.presence, r.distance_cm)),
            Some((false, 12))
        );
    }

    #[test]
    fn test_passthrough_forwards_every_line() {
        let config = BridgeConfig::new().with_mode(ParseMode::Passthrough);
        let (mut bridge, sensor, mock) = server_bridge(config);
        let peer = join(&mut bridge, &mock, 0);

        sensor.push(b"Done\nDone\nsay \"hi\"\n");
        for now in 1..=3 {
            bridge.tick(now);
        }

        assert_eq!(
            mock.sent_to(peer),
            vec![
                r#"{"sensorId":"sensor1","raw":"Done"}"#.to_string(),
                r#"{"sensorId":"sensor1","raw":"Done"}"#.to_string(),
                r#"{"sensorId":"sensor1","raw":"say \"hi\""}"#.to_string(),
            ]
        );
        assert!(!bridge.is_structured());

        // No snapshot in passthrough mode.
        let late = join(&mut bridge, &mock, 10);
        assert!(mock.sent_to(late).is_empty());
    }

    #[test]
    fn test_rejection_is_counted() {
        let config = BridgeConfig::new().with_max_clients(1);
        let (mut bridge, _sensor, mock) = server_bridge(config);
        join(&mut bridge, &mock, 0);
        join(&mut bridge, &mock, 1);

        assert_eq!(bridge.stats().rejected_clients, 1);
        assert_eq!(bridge.manager().client_count(), 1);
        assert_eq!(mock.rejected().len(), 1);
    }

    #[test]
    fn test_send_failures_surface_in_stats() {
        let (mut bridge, sensor, mock) = server_bridge(BridgeConfig::new());
        let a = join(&mut bridge, &mock, 0);
        let b = join(&mut bridge, &mock, 0);
        mock.fail_sends_to(a);

        sensor.push(b"$JYBSS,1,0,45,0\n");
        assert_eq!(bridge.tick(1).delivered, Some(1));
        assert_eq!(mock.sent_to(b).len(), 1);
        assert_eq!(bridge.stats().send_failures, 1);
        assert_eq!(bridge.manager().client_count(), 1);
    }

    #[test]
    fn test_reset_state_republishes() {
        let (mut bridge, sensor, _mock) = server_bridge(BridgeConfig::new());
        sensor.push(b"$JYBSS,1,0,45,0\n$JYBSS,1,0,45,0\n");

        bridge.tick(1);
        bridge.reset_state();
        assert!(bridge.state().last_published().is_none());
        assert_eq!(bridge.tick(2).delivered, Some(0));
        assert_eq!(bridge.stats().published, 2);
    }

    #[test]
    fn test_client_role_forwards_upstream_commands() {
        let config = BridgeConfig::new()
            .with_role(Role::Client)
            .with_upstream_url("ws://10.0.0.2:3000/ws");
        let sensor = ScriptedSensor::new();
        let mock = MockTransport::new();
        let manager = ConnectionManager::for_role(Box::new(mock.clone()), &config);
        let mut bridge = Bridge::new(&config, sensor.clone(), manager);

        // Not connected yet: readings are dropped, not queued.
        sensor.push(b"$JYBSS,1,0,45,0\n");
        assert_eq!(bridge.tick(0).delivered, Some(0));
        assert!(mock.connects().is_empty());

        bridge.set_network_ready(true);
        bridge.tick(1);
        let peer = mock.connects()[0];
        assert_eq!(bridge.manager().connection_state(), Some(LinkState::Connecting));

        mock.push_event(TransportEvent::Opened { peer, remote: None });
        mock.push_event(TransportEvent::Text {
            peer,
            text: "getSensitivity".into(),
        });
        let outcome = bridge.tick(2);

        assert_eq!(outcome.commands_forwarded, 1);
        assert_eq!(sensor.written(), vec!["getSensitivity".to_string()]);
        assert_eq!(bridge.manager().connection_state(), Some(LinkState::Connected));

        sensor.push(b"$JYBSS,0,0,45,0\n");
        assert_eq!(bridge.tick(3).delivered, Some(1));
        assert_eq!(mock.sent_to(peer).len(), 1);
    }

    #[test]
    fn test_console_commands_reach_sensor() {
        let (tx, console) = ConsoleCommands::channel(4);
        let config = BridgeConfig::new();
        let sensor = ScriptedSensor::new();
        let manager = ConnectionManager::server(Box::new(MockTransport::new()), &config);
        let mut bridge =
            Bridge::new(&config, sensor.clone(), manager).with_commands(Box::new(console));

        assert!(bridge.tick(0).is_idle());

        tx.try_send("sensorStop".into()).unwrap();
        assert_eq!(bridge.tick(1).commands_forwarded, 1);
        assert_eq!(sensor.written(), vec!["sensorStop".to_string()]);
        assert_eq!(bridge.stats().commands_forwarded, 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = BridgeConfig::new().with_loop_yield_ms(1);
        let (mut bridge, sensor, _mock) = server_bridge(config);
        sensor.push(b"$JYBSS,1,0,45,0\n$JYBSS,0,0,45,0\n");

        bridge.run(sleep(Duration::from_millis(100))).await;

        assert_eq!(bridge.stats().lines, 2);
        assert_eq!(bridge.stats().published, 2);
        assert_eq!(sensor.pending(), 0);
    }
}
