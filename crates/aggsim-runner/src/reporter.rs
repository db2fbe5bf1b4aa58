//! Per-second measurement output.
//!
//! The reporter runs between ticks at every simulated-second boundary, with
//! no concurrent writers. It prints one aggregate line and one line per rack
//! hub to an owned sink, feeds the run-level metrics counters, and resets the
//! per-second counters. Output carries no wall-clock timestamps, so two runs
//! of the same configuration produce identical bytes.

use crate::node::Node;
use metrics::{counter, gauge};
use std::io::Write;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// Writes the per-second measurement stream.
pub struct Reporter {
    sink: Box<dyn Write>,
    ticks: i64,
}

impl Reporter {
    /// Create a reporter writing to `sink`. `ticks` is the tick count per
    /// simulated second, needed to scale per-tick ceilings to utilization.
    pub fn new(sink: Box<dyn Write>, ticks: i64) -> Self {
        Reporter { sink, ticks }
    }

    /// Emit the lines for `second` and reset every per-second counter.
    pub fn report(&mut self, second: i64, nodes: &mut [Node]) -> std::io::Result<()> {
        let total_self: i64 = nodes.iter().map(|n| n.sec.self_bytes).sum();
        let total_saved: i64 = nodes.iter().map(|n| n.sec.saved_bytes).sum();
        writeln!(
            self.sink,
            "second {:>4}: self {:.2} MB, saved {:.2} MB",
            second,
            mb(total_self),
            mb(total_saved)
        )?;

        for node in nodes.iter() {
            // Only rack hubs appear in the per-second breakdown.
            if node.level[0].is_none() {
                continue;
            }
            let inbound = node.sec.in_bytes + node.sec.self_bytes;
            let in_util = percent(node.sec.in_bytes, node.in_limit * self.ticks);
            let out_util = percent(node.sec.out_bytes, node.out_limit * self.ticks);
            let role = if node.parent[0].is_none() { " (root)" } else { "" };
            writeln!(
                self.sink,
                "  hub {:>4}{}: in {:.2} MB, out {:.2} MB, eff {:.2} MB, in_util {:.1}%, out_util {:.1}%",
                node.id,
                role,
                mb(inbound),
                mb(node.sec.out_bytes),
                mb(node.sec.eff_out_bytes),
                in_util,
                out_util
            )?;
        }
        self.sink.flush()?;

        counter!("aggsim.traffic.self_bytes").increment(total_self as u64);
        counter!("aggsim.traffic.saved_bytes").increment(total_saved as u64);
        let root_out: i64 = nodes
            .iter()
            .filter(|n| n.level[0] == Some(0))
            .map(|n| n.sec.out_bytes)
            .sum();
        let root_eff: i64 = nodes
            .iter()
            .filter(|n| n.level[0] == Some(0))
            .map(|n| n.sec.eff_out_bytes)
            .sum();
        counter!("aggsim.traffic.root_out_bytes").increment(root_out as u64);
        counter!("aggsim.traffic.root_eff_out_bytes").increment(root_eff as u64);
        gauge!("aggsim.sim.seconds").set(second as f64);

        for node in nodes.iter_mut() {
            node.sec.reset();
        }
        Ok(())
    }
}

fn mb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

fn percent(used: i64, limit: i64) -> f64 {
    if limit <= 0 {
        0.0
    } else {
        100.0 * used as f64 / limit as f64
    }
}
