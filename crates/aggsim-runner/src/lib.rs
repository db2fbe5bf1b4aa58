//! # aggsim-runner
//!
//! Tick engine for the aggsim aggregation-overlay simulator.
//!
//! This crate re-exports the key types for running simulations
//! programmatically and for integration testing:
//! - [`Simulation`]: the tick-synchronous engine
//! - [`Reporter`]: the per-second measurement stream
//! - [`InMemoryRecorder`]: metrics collection for end-of-run export
//!
//! ## Tick Structure
//!
//! Each tick is bulk-synchronous. Admit, generate, and compact run for every
//! node, in parallel across worker threads when configured; each worker owns
//! a contiguous chunk of the node arena and touches nothing outside it. After
//! the join, the emit phase runs serially in node-id order because any node
//! may push into any other node's inbound queue. A child's emission in tick
//! `t` therefore becomes visible to its parent no earlier than tick `t + 1`.
//!
//! Determinism: with one worker thread, identical configurations and key
//! files produce byte-identical reporter output. With several workers the
//! interleaving of key fetches across chunks is scheduling-dependent.

pub mod metrics_export;
mod node;
pub mod reporter;

pub use metrics_export::InMemoryRecorder;
pub use node::Node;
pub use reporter::Reporter;

use aggsim_common::Tick;
use aggsim_keys::{KeyError, KeySource};
use aggsim_model::{GcPlan, ModelError, SimConfig, Topology};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while building or running a simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration or layout error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Key stream failure. Always fatal; a corrupt key stream invalidates
    /// the experiment.
    #[error("key stream error: {0}")]
    Keys(#[from] KeyError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Totals collected over a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Simulated seconds completed.
    pub seconds: i64,
    /// Ticks executed.
    pub total_ticks: i64,
    /// Data messages generated across all nodes.
    pub total_generated: u64,
    /// Duplicates absorbed by compaction across all nodes.
    pub total_saved: u64,
    /// Physical emissions across all nodes, internal hops included.
    pub total_forwarded: u64,
    /// Physical data messages that left the system at tree roots.
    pub root_messages: u64,
    /// Sum of `eff_size` over messages that left the system at tree roots.
    pub root_effective: i64,
    /// Wall-clock time for the run, milliseconds.
    pub wall_time_ms: u64,
}

// ============================================================================
// Simulation Engine
// ============================================================================

/// Per-tick parameters handed to worker threads.
#[derive(Clone, Copy)]
struct TickParams {
    now: Tick,
    msg_size: i64,
    gc_period: i64,
    tree_count: usize,
}

/// The tick-synchronous simulation engine.
pub struct Simulation {
    config: SimConfig,
    tree_count: usize,
    nodes: Vec<Node>,
    keys: Arc<dyn KeySource>,
    reporter: Reporter,
    tick: Tick,
    root_messages: u64,
    root_effective: i64,
    outbox: Vec<(usize, aggsim_common::Message)>,
}

impl Simulation {
    /// Build the node arena for `config` and wire it to `keys`. The reporter
    /// stream goes to `sink`.
    pub fn new(
        config: SimConfig,
        keys: Arc<dyn KeySource>,
        sink: Box<dyn Write>,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        let topology = Topology::build(&config)?;
        let plan = GcPlan::assign(&topology, &config);

        let msgs_per_tick = config.msgs_per_tick();
        let mut nodes = Vec::with_capacity(topology.total_nodes);
        for id in 0..topology.total_nodes {
            // Rack 0's hub is the tree-0 root and may carry override limits.
            let (in_limit, out_limit) = if id == 0 {
                (
                    config.root_in_limit_per_tick(),
                    config.root_out_limit_per_tick(),
                )
            } else {
                (config.in_limit_per_tick(), config.out_limit_per_tick())
            };
            nodes.push(Node::new(
                id,
                topology.parent[id].clone(),
                topology.level[id].clone(),
                plan.enabled[id].clone(),
                plan.delay[id].clone(),
                in_limit,
                out_limit,
                msgs_per_tick,
            ));
        }

        info!(
            nodes = topology.total_nodes,
            trees = topology.tree_count,
            policy = config.gc_policy.as_label(),
            nthreads = config.nthreads,
            "simulation initialized"
        );

        let reporter = Reporter::new(sink, config.ticks);
        Ok(Simulation {
            tree_count: topology.tree_count,
            nodes,
            keys,
            reporter,
            tick: 0,
            root_messages: 0,
            root_effective: 0,
            outbox: Vec::new(),
            config,
        })
    }

    /// Run for the configured duration and return the run totals.
    pub fn run(&mut self) -> Result<SimulationStats, RunnerError> {
        let started = Instant::now();
        let duration_ticks = self.config.duration_ticks();
        for _ in 0..duration_ticks {
            self.step()?;
        }
        let stats = self.stats(started.elapsed().as_millis() as u64);
        info!(
            seconds = stats.seconds,
            generated = stats.total_generated,
            saved = stats.total_saved,
            root_messages = stats.root_messages,
            root_effective = stats.root_effective,
            wall_time_ms = stats.wall_time_ms,
            "simulation complete"
        );
        Ok(stats)
    }

    /// Advance one tick: parallel admit/generate/compact, join, serial emit,
    /// and the reporter at second boundaries.
    pub fn step(&mut self) -> Result<(), RunnerError> {
        let params = TickParams {
            now: self.tick,
            msg_size: self.config.msg_size,
            gc_period: self.config.gc_period,
            tree_count: self.tree_count,
        };

        let workers = self.config.nthreads;
        if workers <= 1 {
            run_chunk(&mut self.nodes, params, self.keys.as_ref())?;
        } else {
            self.run_parallel(params, workers)?;
        }

        for id in 0..self.nodes.len() {
            self.emit_node(id, params.now, params.msg_size);
        }

        if cfg!(debug_assertions) {
            for node in &self.nodes {
                debug_assert!(node.in_bytes <= node.in_limit, "inbound ceiling breached");
                debug_assert!(node.out_bytes <= node.out_limit, "outbound ceiling breached");
            }
        }

        self.tick += 1;
        if self.tick % self.config.ticks == 0 {
            let second = self.tick / self.config.ticks;
            self.reporter.report(second, &mut self.nodes)?;
            debug!(second, "reported");
        }
        Ok(())
    }

    /// Phases 1-3 on `nthreads` scoped workers over contiguous chunks. The
    /// last chunk absorbs the remainder.
    fn run_parallel(&mut self, params: TickParams, workers: usize) -> Result<(), RunnerError> {
        let chunk_len = self.nodes.len() / workers;
        let keys = self.keys.as_ref();
        let results = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let mut rest: &mut [Node] = &mut self.nodes;
            for _ in 0..workers - 1 {
                let (chunk, tail) = rest.split_at_mut(chunk_len);
                rest = tail;
                handles.push(scope.spawn(move || run_chunk(chunk, params, keys)));
            }
            handles.push(scope.spawn(move || run_chunk(rest, params, keys)));
            handles
                .into_iter()
                .map(|handle| handle.join().expect("worker thread panicked"))
                .collect::<Vec<_>>()
        });
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Phase 4 for one node: drain eligible buffer fronts across trees until
    /// a full pass over the trees emits nothing, so trees share the outbound
    /// ceiling by interleaved availability.
    fn emit_node(&mut self, id: usize, now: Tick, msg_size: i64) {
        loop {
            let mut emitted = false;
            for k in 0..self.tree_count {
                let node = &mut self.nodes[id];
                // Tombstones surface only here, at the buffer front.
                while node.bufs[k].front().is_some_and(|m| m.is_tombstone()) {
                    node.bufs[k].pop_front();
                }
                while node.bufs[k].front().is_some_and(|front| {
                    !front.is_tombstone()
                        && front.time <= now
                        && node.out_bytes + msg_size <= node.out_limit
                }) {
                    let Some(msg) = node.bufs[k].pop_front() else {
                        break;
                    };
                    assert!(
                        msg.eff_size > 0,
                        "emitted message carries non-positive effective size"
                    );
                    node.out_bytes += msg_size;
                    node.sec.out_bytes += msg_size;
                    node.sec.eff_out_bytes += msg.eff_size * msg_size;
                    node.total_out_msgs += 1;
                    emitted = true;
                    match node.parent[k] {
                        Some(parent) => self.outbox.push((parent, msg)),
                        None => {
                            // Root emissions leave the system.
                            self.root_messages += 1;
                            self.root_effective += msg.eff_size;
                        }
                    }
                }
            }
            if !emitted {
                break;
            }
        }
        for (dest, msg) in self.outbox.drain(..) {
            self.nodes[dest].enqueue(msg);
        }
    }

    /// Snapshot the run totals.
    pub fn stats(&self, wall_time_ms: u64) -> SimulationStats {
        SimulationStats {
            seconds: self.tick / self.config.ticks,
            total_ticks: self.tick,
            total_generated: self.nodes.iter().map(|n| n.total_generated).sum(),
            total_saved: self.nodes.iter().map(|n| n.total_saved).sum(),
            total_forwarded: self.nodes.iter().map(|n| n.total_out_msgs).sum(),
            root_messages: self.root_messages,
            root_effective: self.root_effective,
            wall_time_ms,
        }
    }

    /// The node arena, for inspection in tests and the reporter pipeline.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Current tick.
    pub fn now(&self) -> Tick {
        self.tick
    }

    /// Sum of `eff_size` over every live data message still in the system.
    ///
    /// Conservation holds at any tick boundary:
    /// `total_generated == root_effective + live_effective()`.
    pub fn live_effective(&self) -> i64 {
        self.nodes.iter().map(|n| n.live_effective()).sum()
    }

    /// Count of live data messages still in the system. Conservation holds
    /// at any tick boundary:
    /// `total_generated == root_messages + total_saved + live_data_messages()`.
    pub fn live_data_messages(&self) -> u64 {
        self.nodes.iter().map(|n| n.live_data_messages()).sum()
    }
}

/// Phases 1-3 over one contiguous chunk of the arena. No state outside the
/// chunk is touched; the key stream serializes internally.
fn run_chunk(chunk: &mut [Node], params: TickParams, keys: &dyn KeySource) -> Result<(), KeyError> {
    for node in chunk {
        node.begin_tick();
        node.admit(params.now, params.msg_size);
        node.generate(params.now, keys, params.tree_count, params.msg_size)?;
        node.compact(params.now, params.gc_period, params.msg_size);
    }
    Ok(())
}
