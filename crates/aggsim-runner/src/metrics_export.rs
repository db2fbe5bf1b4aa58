//! Metrics collection and export.
//!
//! An in-memory recorder backs the `metrics` facade during a run. The engine
//! and reporter publish run-level counters and gauges through the usual
//! macros; at the end of a run a snapshot can be exported as JSON or in the
//! Prometheus text exposition format.
//!
//! Histograms are accepted and discarded; nothing in the simulator records
//! per-event latencies.

use metrics::{Counter, CounterFn, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Default)]
struct AtomicCounter(AtomicU64);

impl CounterFn for AtomicCounter {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

/// Gauge cell storing the f64 bit pattern.
#[derive(Debug, Default)]
struct AtomicGauge(AtomicU64);

impl AtomicGauge {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl GaugeFn for AtomicGauge {
    fn increment(&self, value: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    fn decrement(&self, value: f64) {
        self.increment(-value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Default)]
struct RecorderState {
    counters: RwLock<BTreeMap<String, Arc<AtomicCounter>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicGauge>>>,
}

impl RecorderState {
    fn get_or_create_counter(&self, key: &Key) -> Arc<AtomicCounter> {
        Arc::clone(
            self.counters
                .write()
                .entry(key.name().to_string())
                .or_default(),
        )
    }

    fn get_or_create_gauge(&self, key: &Key) -> Arc<AtomicGauge> {
        Arc::clone(
            self.gauges
                .write()
                .entry(key.name().to_string())
                .or_default(),
        )
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// In-memory `metrics` recorder keyed by metric name.
#[derive(Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        InMemoryRecorder::default()
    }

    /// Install this recorder as the global `metrics` sink. Returns false if
    /// another recorder got there first.
    pub fn install(&self) -> bool {
        metrics::set_global_recorder(self.clone()).is_ok()
    }

    /// Copy out the current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .state
            .counters
            .read()
            .iter()
            .map(|(name, cell)| (name.clone(), cell.0.load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .state
            .gauges
            .read()
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect();
        MetricsSnapshot { counters, gauges }
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.state.get_or_create_counter(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.state.get_or_create_gauge(key))
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

// ============================================================================
// Snapshot & Export
// ============================================================================

/// Collected metric values at one point in time.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Counter values by metric name.
    pub counters: BTreeMap<String, u64>,
    /// Gauge values by metric name.
    pub gauges: BTreeMap<String, f64>,
}

/// Export a snapshot as pretty JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// Export a snapshot in Prometheus text exposition format.
pub fn export_prometheus<W: Write>(
    snapshot: &MetricsSnapshot,
    writer: &mut W,
) -> std::io::Result<()> {
    for (name, value) in &snapshot.counters {
        let prom_name = name.replace('.', "_");
        writeln!(writer, "# TYPE {} counter", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
    }
    for (name, value) in &snapshot.gauges {
        let prom_name = name.replace('.', "_");
        writeln!(writer, "# TYPE {} gauge", prom_name)?;
        writeln!(writer, "{} {}", prom_name, value)?;
    }
    Ok(())
}
