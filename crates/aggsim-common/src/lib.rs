//! # aggsim-common
//!
//! Common types for the aggsim simulation framework.
//!
//! This crate provides the primitives shared by the model and runner crates:
//! - Discrete time representation ([`Tick`])
//! - The unit of traffic ([`Message`], [`MessageKind`])
//! - Per-second traffic accounting ([`SecondCounters`])

use serde::Serialize;

// ============================================================================
// Time Types
// ============================================================================

/// Discrete simulation time. The tick scheduler advances one tick at a time;
/// a configured number of ticks make up one simulated second.
pub type Tick = i64;

// ============================================================================
// Message Types
// ============================================================================

/// Kind of a buffered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Live application data identified by a key.
    Data,
    /// A logically dead buffer slot left behind by compaction. Tombstones are
    /// never transmitted and are dropped once they reach a buffer front.
    Tombstone,
}

/// One message travelling up the aggregation overlay.
///
/// A freshly generated message represents exactly one application record
/// (`eff_size == 1`). Compaction at a hub absorbs later duplicates of a key
/// into the earliest buffered occurrence, so a forwarded message can stand in
/// for many originals.
#[derive(Debug, Clone)]
pub struct Message {
    /// Data or tombstone.
    pub kind: MessageKind,
    /// Application key. Meaningful only for data messages; always >= 0.
    pub key: i64,
    /// Number of original data messages this one represents. Always >= 1 for
    /// live data.
    pub eff_size: i64,
    /// Earliest tick at which the current node may emit this message.
    pub time: Tick,
    /// Spanning tree this message is routed on. Zero when single-tree.
    pub tree: usize,
}

impl Message {
    /// Create a fresh data message for `key` on `tree`, eligible at `time`.
    pub fn data(key: i64, time: Tick, tree: usize) -> Self {
        Message {
            kind: MessageKind::Data,
            key,
            eff_size: 1,
            time,
            tree,
        }
    }

    /// True if this slot has been retired by compaction.
    pub fn is_tombstone(&self) -> bool {
        self.kind == MessageKind::Tombstone
    }

    /// Retire this slot in place. The key and effective size stay behind for
    /// debugging but carry no meaning afterwards.
    pub fn retire(&mut self) {
        self.kind = MessageKind::Tombstone;
    }
}

// ============================================================================
// Accounting
// ============================================================================

/// Byte counters accumulated over one simulated second at a single node.
///
/// The reporter reads these at every second boundary and then resets them.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SecondCounters {
    /// Bytes admitted from children.
    pub in_bytes: i64,
    /// Bytes emitted toward the parent (physical).
    pub out_bytes: i64,
    /// Bytes emitted weighted by effective size.
    pub eff_out_bytes: i64,
    /// Bytes of self-generated traffic.
    pub self_bytes: i64,
    /// Bytes saved by compaction (one message size per absorbed duplicate).
    pub saved_bytes: i64,
}

impl SecondCounters {
    /// Clear all five counters for the next second.
    pub fn reset(&mut self) {
        *self = SecondCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_message_starts_live() {
        let msg = Message::data(42, 7, 1);
        assert_eq!(msg.kind, MessageKind::Data);
        assert_eq!(msg.key, 42);
        assert_eq!(msg.eff_size, 1);
        assert_eq!(msg.time, 7);
        assert_eq!(msg.tree, 1);
        assert!(!msg.is_tombstone());
    }

    #[test]
    fn test_retire_marks_tombstone() {
        let mut msg = Message::data(1, 0, 0);
        msg.retire();
        assert!(msg.is_tombstone());
    }

    #[test]
    fn test_second_counters_reset() {
        let mut sec = SecondCounters {
            in_bytes: 10,
            out_bytes: 20,
            eff_out_bytes: 30,
            self_bytes: 40,
            saved_bytes: 50,
        };
        sec.reset();
        assert_eq!(sec.in_bytes, 0);
        assert_eq!(sec.out_bytes, 0);
        assert_eq!(sec.eff_out_bytes, 0);
        assert_eq!(sec.self_bytes, 0);
        assert_eq!(sec.saved_bytes, 0);
    }
}
