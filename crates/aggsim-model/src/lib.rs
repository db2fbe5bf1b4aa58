//! # aggsim-model
//!
//! Configuration and layout building for aggsim.
//!
//! This crate provides:
//! - The simulation configuration ([`SimConfig`]) with fail-fast validation
//! - The spanning-tree builder over rack hubs ([`topology`])
//! - GC-policy assignment decorating hubs with per-level delays ([`policy`])

pub mod policy;
pub mod topology;

pub use policy::{GcPlan, GcPolicy};
pub use topology::Topology;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while validating a configuration or building a layout.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A configuration field is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An unknown GC policy id was requested.
    #[error("unknown GC policy id {0} (expected 0..=3)")]
    UnknownPolicy(u8),
}

// ============================================================================
// Simulation Configuration
// ============================================================================

/// Complete description of one simulation run.
///
/// Field semantics follow the CLI flags one-to-one; bandwidth limits are
/// per-second values that the engine divides down to per-tick ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of racks.
    pub nracks: usize,
    /// Nodes per rack. Index 0 within a rack is the rack hub.
    pub nodes_per_rack: usize,
    /// Fanout of the rack-level tree.
    pub fanout: usize,
    /// Build `max(2, fanout - 1)` trees instead of one.
    pub multitree: bool,
    /// Self-generated messages per node per second.
    pub msg_rate: i64,
    /// Wire size of one message in bytes.
    pub msg_size: i64,
    /// Compaction policy for hubs.
    pub gc_policy: GcPolicy,
    /// Compaction runs every this many ticks.
    pub gc_period: i64,
    /// Accumulated delay budget from leaf to root, in ticks.
    pub gc_acc_delay: i64,
    /// Inbound bandwidth limit per second, bytes.
    pub in_limit: i64,
    /// Outbound bandwidth limit per second, bytes.
    pub out_limit: i64,
    /// Inbound limit override for the rack-0 hub. Falls back to `in_limit`.
    pub in_limit_root: Option<i64>,
    /// Outbound limit override for the rack-0 hub. Falls back to `out_limit`.
    pub out_limit_root: Option<i64>,
    /// Simulated seconds to run.
    pub duration: i64,
    /// Ticks per simulated second.
    pub ticks: i64,
    /// Worker threads for the parallel phases.
    pub nthreads: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            nracks: 1,
            nodes_per_rack: 1,
            fanout: 2,
            multitree: false,
            msg_rate: 4000,
            msg_size: 32,
            gc_policy: GcPolicy::None,
            gc_period: 10,
            gc_acc_delay: 100,
            in_limit: 125_000_000,
            out_limit: 125_000_000,
            in_limit_root: None,
            out_limit_root: None,
            duration: 60,
            ticks: 1000,
            nthreads: 1,
        }
    }
}

impl SimConfig {
    /// Check every field range and fail fast on the first violation.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.nracks < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "nracks must be >= 1, got {}",
                self.nracks
            )));
        }
        if self.nodes_per_rack < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "nodes_per_rack must be >= 1, got {}",
                self.nodes_per_rack
            )));
        }
        if self.fanout < 2 {
            return Err(ModelError::InvalidConfig(format!(
                "fanout must be >= 2, got {}",
                self.fanout
            )));
        }
        if self.msg_rate < 0 {
            return Err(ModelError::InvalidConfig(format!(
                "msg_rate must be >= 0, got {}",
                self.msg_rate
            )));
        }
        if self.msg_size < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "msg_size must be >= 1, got {}",
                self.msg_size
            )));
        }
        if self.gc_period < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "gc_period must be >= 1, got {}",
                self.gc_period
            )));
        }
        if self.gc_acc_delay < 0 {
            return Err(ModelError::InvalidConfig(format!(
                "gc_acc_delay must be >= 0, got {}",
                self.gc_acc_delay
            )));
        }
        for (name, value) in [
            ("in_limit", self.in_limit),
            ("out_limit", self.out_limit),
            ("in_limit_root", self.in_limit_root.unwrap_or(self.in_limit)),
            (
                "out_limit_root",
                self.out_limit_root.unwrap_or(self.out_limit),
            ),
        ] {
            if value < 1 {
                return Err(ModelError::InvalidConfig(format!(
                    "{} must be >= 1, got {}",
                    name, value
                )));
            }
        }
        if self.duration < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "duration must be >= 1, got {}",
                self.duration
            )));
        }
        if self.ticks < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "ticks must be >= 1, got {}",
                self.ticks
            )));
        }
        if self.nthreads < 1 {
            return Err(ModelError::InvalidConfig(format!(
                "nthreads must be >= 1, got {}",
                self.nthreads
            )));
        }
        Ok(())
    }

    /// Total nodes across all racks.
    pub fn total_nodes(&self) -> usize {
        self.nracks * self.nodes_per_rack
    }

    /// Number of spanning trees to build.
    pub fn tree_count(&self) -> usize {
        if self.multitree {
            std::cmp::max(2, self.fanout - 1)
        } else {
            1
        }
    }

    /// Messages each node generates per tick. Truncating, so rates below one
    /// message per tick generate nothing.
    pub fn msgs_per_tick(&self) -> i64 {
        self.msg_rate / self.ticks
    }

    /// Per-tick inbound ceiling for a non-root node, bytes.
    pub fn in_limit_per_tick(&self) -> i64 {
        self.in_limit / self.ticks
    }

    /// Per-tick outbound ceiling for a non-root node, bytes.
    pub fn out_limit_per_tick(&self) -> i64 {
        self.out_limit / self.ticks
    }

    /// Per-tick inbound ceiling for the rack-0 hub, bytes.
    pub fn root_in_limit_per_tick(&self) -> i64 {
        self.in_limit_root.unwrap_or(self.in_limit) / self.ticks
    }

    /// Per-tick outbound ceiling for the rack-0 hub, bytes.
    pub fn root_out_limit_per_tick(&self) -> i64 {
        self.out_limit_root.unwrap_or(self.out_limit) / self.ticks
    }

    /// Total ticks the scheduler will run.
    pub fn duration_ticks(&self) -> i64 {
        self.duration * self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fanout() {
        let config = SimConfig {
            fanout: 1,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_racks() {
        let config = SimConfig {
            nracks: 0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_root_limit() {
        let config = SimConfig {
            in_limit_root: Some(0),
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tree_count() {
        let mut config = SimConfig::default();
        assert_eq!(config.tree_count(), 1);
        config.multitree = true;
        assert_eq!(config.tree_count(), 2); // fanout 2 -> max(2, 1)
        config.fanout = 4;
        assert_eq!(config.tree_count(), 3);
        config.fanout = 5;
        assert_eq!(config.tree_count(), 4);
    }

    #[test]
    fn test_per_tick_limits() {
        let config = SimConfig {
            in_limit: 125_000_000,
            out_limit: 10_000,
            in_limit_root: Some(250_000_000),
            ticks: 1000,
            ..SimConfig::default()
        };
        assert_eq!(config.in_limit_per_tick(), 125_000);
        assert_eq!(config.out_limit_per_tick(), 10);
        assert_eq!(config.root_in_limit_per_tick(), 250_000);
        // No override: root falls back to the shared limit.
        assert_eq!(config.root_out_limit_per_tick(), 10);
    }

    #[test]
    fn test_msgs_per_tick_truncates() {
        let config = SimConfig {
            msg_rate: 4500,
            ticks: 1000,
            ..SimConfig::default()
        };
        assert_eq!(config.msgs_per_tick(), 4);
        let slow = SimConfig {
            msg_rate: 999,
            ticks: 1000,
            ..SimConfig::default()
        };
        assert_eq!(slow.msgs_per_tick(), 0);
    }
}
