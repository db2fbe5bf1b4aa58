//! Spanning-tree layout over rack hubs.
//!
//! One hub per rack participates in the inter-rack tree; the remaining nodes
//! of a rack are leaves attached to their hub on every tree. The rack-level
//! shape is a level-order "heap" layout: position `i > 0` hangs under position
//! `(i - 1) / fanout`. With multiple trees the internal-node window of the
//! level-order array is rotated so different racks carry internal duties on
//! different trees.
//!
//! The graph lives entirely in integer node ids; parents are ids, never
//! owning handles, and nodes do not know their children.

use crate::{ModelError, SimConfig};
use tracing::debug;

/// Per-node, per-tree layout tables for one simulation.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Total node count across all racks.
    pub total_nodes: usize,
    /// Number of trees built.
    pub tree_count: usize,
    /// Level-order hub layout per tree: `trees[k][i]` is a hub node id.
    pub trees: Vec<Vec<usize>>,
    /// Parent id per node per tree. `None` marks the root of that tree.
    pub parent: Vec<Vec<Option<usize>>>,
    /// Tree depth per node per tree. `None` for non-hub leaves, `Some(0)` at
    /// the root.
    pub level: Vec<Vec<Option<u32>>>,
}

impl Topology {
    /// Build the layout for `config`. The configuration must already be
    /// validated.
    pub fn build(config: &SimConfig) -> Result<Self, ModelError> {
        config.validate()?;

        let racks = config.nracks;
        let per_rack = config.nodes_per_rack;
        let fanout = config.fanout;
        let total_nodes = config.total_nodes();
        let tree_count = config.tree_count();

        // Identity layout first: hub of rack j sits at level-order position j.
        let mut trees: Vec<Vec<usize>> = (0..tree_count)
            .map(|_| (0..racks).map(|j| j * per_rack).collect())
            .collect();

        // Rotate the internal-node window for the extra trees so internal
        // responsibility lands on different racks per tree. Out-of-range
        // swap partners are skipped; the layout is degenerate there.
        let internal = internal_node_count(fanout, racks);
        for (k, tree) in trees.iter_mut().enumerate().skip(1) {
            for j in 0..internal {
                let partner = j + k * internal;
                if partner < racks {
                    tree.swap(j, partner);
                }
            }
        }

        let mut parent = vec![vec![None; tree_count]; total_nodes];
        let mut level = vec![vec![None; tree_count]; total_nodes];

        for (k, tree) in trees.iter().enumerate() {
            for (pos, &hub) in tree.iter().enumerate() {
                level[hub][k] = Some(position_level(pos, fanout));
                if pos > 0 {
                    parent[hub][k] = Some(tree[(pos - 1) / fanout]);
                }
            }
            // Every non-hub leaf funnels through its rack hub on every tree.
            for rack in 0..racks {
                let hub = rack * per_rack;
                for offset in 1..per_rack {
                    parent[hub + offset][k] = Some(hub);
                }
            }
        }

        debug!(
            racks,
            per_rack,
            fanout,
            tree_count,
            levels = tree_levels(fanout, racks),
            "built topology"
        );

        Ok(Topology {
            total_nodes,
            tree_count,
            trees,
            parent,
            level,
        })
    }

    /// Node ids that act as rack hubs, in rack order.
    pub fn hubs(&self) -> impl Iterator<Item = usize> + '_ {
        self.trees[0].iter().copied()
    }

    /// True if `node` is a rack hub.
    pub fn is_hub(&self, node: usize) -> bool {
        self.level[node][0].is_some()
    }
}

/// Depth of a tree with `n` nodes and the given fanout; equals
/// `ceil(log_f((f - 1) n + 1))`.
pub fn tree_levels(fanout: usize, n: usize) -> u32 {
    let mut covered = 0usize;
    let mut width = 1usize;
    let mut levels = 0u32;
    while covered < n {
        covered += width;
        width = width.saturating_mul(fanout);
        levels += 1;
    }
    levels
}

/// Count of internal (non-leaf) positions in a level-order layout of `n`
/// nodes with the given fanout.
///
/// Walk full levels top-down; nodes on the partial deepest level are all
/// leaves, and `ceil(rem / fanout)` nodes of the last full level parent them.
pub fn internal_node_count(fanout: usize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut sum_full = 0usize;
    let mut width = 1usize;
    while sum_full + width <= n {
        sum_full += width;
        width = width.saturating_mul(fanout);
    }
    let last_full_width = width / fanout;
    let rem = n - sum_full;
    if rem == 0 {
        // Perfect shape: the deepest full level is all leaves.
        sum_full - last_full_width
    } else {
        let partial_parents = rem.div_ceil(fanout);
        sum_full - last_full_width + partial_parents
    }
}

/// Depth of level-order position `pos` (root position 0 has depth 0).
fn position_level(pos: usize, fanout: usize) -> u32 {
    let mut start = 0usize;
    let mut width = 1usize;
    let mut depth = 0u32;
    while pos >= start + width {
        start += width;
        width = width.saturating_mul(fanout);
        depth += 1;
    }
    depth
}
