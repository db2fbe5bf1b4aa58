//! GC-policy assignment.
//!
//! After tree construction every rack hub is decorated, per tree, with a flag
//! saying whether it compacts its buffers and a forwarding delay in ticks.
//! The delay is what lets duplicate keys pile up long enough to be merged;
//! the policies split a fixed leaf-to-root delay budget across tree levels
//! in different shapes.

use crate::topology::{tree_levels, Topology};
use crate::{ModelError, SimConfig};
use serde::{Deserialize, Serialize};

/// How the accumulated delay budget is spread over tree levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcPolicy {
    /// No hub compacts; messages forward immediately.
    None,
    /// Every level gets an equal share of the budget.
    Uniform,
    /// Shares shrink toward the leaves; the root waits longest.
    DecreasingDown,
    /// Shares grow toward the leaves; the root waits least.
    IncreasingDown,
}

impl GcPolicy {
    /// Map the numeric CLI id onto a policy.
    pub fn from_id(id: u8) -> Result<Self, ModelError> {
        match id {
            0 => Ok(GcPolicy::None),
            1 => Ok(GcPolicy::Uniform),
            2 => Ok(GcPolicy::DecreasingDown),
            3 => Ok(GcPolicy::IncreasingDown),
            other => Err(ModelError::UnknownPolicy(other)),
        }
    }

    /// Short label for logs and the topology listing.
    pub fn as_label(&self) -> &'static str {
        match self {
            GcPolicy::None => "none",
            GcPolicy::Uniform => "uniform",
            GcPolicy::DecreasingDown => "decreasing-down",
            GcPolicy::IncreasingDown => "increasing-down",
        }
    }
}

/// Per-node, per-tree compaction decoration.
#[derive(Debug, Clone)]
pub struct GcPlan {
    /// Whether the node compacts on that tree.
    pub enabled: Vec<Vec<bool>>,
    /// Delay in ticks stamped onto messages admitted or generated there.
    pub delay: Vec<Vec<i64>>,
}

impl GcPlan {
    /// Decorate the hubs of `topology` according to the configured policy.
    ///
    /// Delays are integer ticks, truncated. The level-shaped variants weight
    /// the per-level share by `L - level` or `level + 1` over the triangle
    /// sum, which preserves the vertical budget up to rounding.
    pub fn assign(topology: &Topology, config: &SimConfig) -> Self {
        let levels = tree_levels(config.fanout, config.nracks) as i64;
        let budget = config.gc_acc_delay;
        let triangle = levels * (levels + 1) / 2;

        let mut enabled = vec![vec![false; topology.tree_count]; topology.total_nodes];
        let mut delay = vec![vec![0i64; topology.tree_count]; topology.total_nodes];

        if config.gc_policy == GcPolicy::None {
            return GcPlan { enabled, delay };
        }

        for node in 0..topology.total_nodes {
            for k in 0..topology.tree_count {
                // Non-hub leaves never compact.
                let Some(level) = topology.level[node][k] else {
                    continue;
                };
                let level = level as i64;
                let ticks = match config.gc_policy {
                    GcPolicy::None => continue,
                    GcPolicy::Uniform => budget / levels,
                    GcPolicy::DecreasingDown => budget * (levels - level) / triangle,
                    GcPolicy::IncreasingDown => budget * (level + 1) / triangle,
                };
                enabled[node][k] = true;
                delay[node][k] = ticks;
            }
        }

        GcPlan { enabled, delay }
    }
}
