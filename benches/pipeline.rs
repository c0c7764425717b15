//! Pipeline benchmark suite.
//!
//! Measures the per-line cost of the bridge hot path:
//! - Frame parsing
//! - Change detection
//! - Envelope encoding
//! - A full tick with connected clients
//!
//! Run with: cargo bench --bench pipeline
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use mmwave_bridge::frame::parse_structured;
use mmwave_bridge::{
    Bridge, BridgeConfig, ConnectionManager, Envelope, PeerId, Result, ScriptedSensor,
    SensorReading, StateTracker, Transport, TransportEvent,
};
use mmwave_bridge::transport::CloseReason;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CLIENT_COUNTS: &[usize] = &[1, 4, 8];

const FRAME: &str = "$JYBSS,1,0,45,0";

// ============================================================================
// Sink Transport
// ============================================================================

/// Transport that accepts every send and drops it.
struct SinkTransport {
    pending: Vec<TransportEvent>,
}

impl SinkTransport {
    fn with_clients(count: usize) -> Self {
        let pending = (0..count)
            .map(|_| TransportEvent::Opened {
                peer: PeerId::next(),
                remote: None,
            })
            .collect();
        Self { pending }
    }
}

impl Transport for SinkTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.pending.pop()
    }

    fn send_text(&mut self, _peer: PeerId, text: &str) -> Result<()> {
        black_box(text);
        Ok(())
    }

    fn ping(&mut self, _peer: PeerId) -> Result<()> {
        Ok(())
    }

    fn close(&mut self, _peer: PeerId) {}

    fn reject(&mut self, _peer: PeerId, _reason: CloseReason) {}
}

// ============================================================================
// Benchmark: Stages
// ============================================================================

fn bench_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("stages");

    group.bench_function("parse_structured", |b| {
        b.iter(|| parse_structured(black_box(FRAME), 0));
    });

    group.bench_function("tracker_observe", |b| {
        let mut tracker = StateTracker::default();
        let mut distance = 0u32;
        b.iter(|| {
            distance = (distance + 7) % 400;
            tracker.observe(SensorReading::new(true, false, black_box(distance), 0))
        });
    });

    group.bench_function("envelope_encode", |b| {
        let reading = SensorReading::new(true, false, 45, 1_234);
        b.iter(|| Envelope::reading("sensor1", black_box(&reading)).encode());
    });

    group.finish();
}

// ============================================================================
// Benchmark: Full Tick
// ============================================================================

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for &clients in CLIENT_COUNTS {
        group.bench_with_input(
            BenchmarkId::new("publish", clients),
            &clients,
            |b, &client_count| {
                let config = BridgeConfig::new().with_max_clients(client_count);
                let sensor = ScriptedSensor::new();
                let manager = ConnectionManager::server(
                    Box::new(SinkTransport::with_clients(client_count)),
                    &config,
                );
                let mut bridge = Bridge::new(&config, sensor.clone(), manager);
                bridge.set_network_ready(true);
                bridge.tick(0);

                // Alternate presence so every line publishes.
                let mut now = 0u64;
                b.iter(|| {
                    now += 1;
                    let presence = now % 2;
                    sensor.push(format!("$JYBSS,{presence},0,45,0\n"));
                    bridge.tick(now)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_stages, bench_tick);
criterion_main!(benches);
