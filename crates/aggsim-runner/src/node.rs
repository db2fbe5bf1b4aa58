//! Per-node state and the parallel pipeline phases.
//!
//! A node owns its inbound queue, one FIFO buffer per tree, and its traffic
//! counters. During the parallel part of a tick (admit, generate, compact)
//! each worker thread touches only the nodes of its own chunk, so nothing
//! here is locked. The emit phase crosses node boundaries and lives with the
//! scheduler in `lib.rs`.

use aggsim_common::{Message, SecondCounters, Tick};
use aggsim_keys::{KeyError, KeySource};
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, VecDeque};

/// An inbound message plus its admission sequence number. The sequence makes
/// the heap order total so equal-time messages keep arrival order.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) msg: Message,
    seq: u64,
}

impl PartialEq for Inbound {
    fn eq(&self, other: &Self) -> bool {
        self.msg.time == other.msg.time && self.seq == other.seq
    }
}

impl Eq for Inbound {}

impl PartialOrd for Inbound {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Inbound {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for a min-heap (earliest eligibility first).
        other
            .msg
            .time
            .cmp(&self.msg.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// One overlay node. Parents are integer ids resolved against the node
/// arena; a node never holds a handle to another node.
pub struct Node {
    /// Arena index of this node.
    pub id: usize,
    /// Parent id per tree; `None` at the root of that tree.
    pub parent: Vec<Option<usize>>,
    /// Depth per tree; `None` for non-hub leaves.
    pub level: Vec<Option<u32>>,
    /// Whether this node compacts on each tree.
    pub gc: Vec<bool>,
    /// Forwarding delay in ticks stamped on admitted/generated messages.
    pub gc_delay: Vec<i64>,
    /// Inbound per-tick byte ceiling.
    pub in_limit: i64,
    /// Outbound per-tick byte ceiling.
    pub out_limit: i64,
    /// Messages self-generated each tick.
    pub msgs_per_tick: i64,

    /// Bytes admitted this tick.
    pub in_bytes: i64,
    /// Bytes emitted this tick.
    pub out_bytes: i64,
    /// Per-second counters, reset by the reporter.
    pub sec: SecondCounters,

    /// Messages admitted over the whole run.
    pub total_in_msgs: u64,
    /// Messages emitted over the whole run.
    pub total_out_msgs: u64,
    /// Messages generated over the whole run.
    pub total_generated: u64,
    /// Duplicates absorbed by compaction over the whole run.
    pub total_saved: u64,

    pub(crate) in_queue: BinaryHeap<Inbound>,
    pub(crate) bufs: Vec<VecDeque<Message>>,
    next_seq: u64,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        parent: Vec<Option<usize>>,
        level: Vec<Option<u32>>,
        gc: Vec<bool>,
        gc_delay: Vec<i64>,
        in_limit: i64,
        out_limit: i64,
        msgs_per_tick: i64,
    ) -> Self {
        let tree_count = parent.len();
        Node {
            id,
            parent,
            level,
            gc,
            gc_delay,
            in_limit,
            out_limit,
            msgs_per_tick,
            in_bytes: 0,
            out_bytes: 0,
            sec: SecondCounters::default(),
            total_in_msgs: 0,
            total_out_msgs: 0,
            total_generated: 0,
            total_saved: 0,
            in_queue: BinaryHeap::new(),
            bufs: vec![VecDeque::new(); tree_count],
            next_seq: 0,
        }
    }

    /// Queue a message from a child. Called only during the serial emit
    /// phase.
    pub(crate) fn enqueue(&mut self, msg: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_queue.push(Inbound { msg, seq });
    }

    /// Phase boundary: clear the per-tick byte counters.
    pub(crate) fn begin_tick(&mut self) {
        self.in_bytes = 0;
        self.out_bytes = 0;
    }

    /// Phase 1: pull inbound messages, earliest eligibility first, until the
    /// queue drains or the inbound ceiling is hit.
    ///
    /// Admission re-stamps the eligibility clock against this node's policy,
    /// so delay composes hop by hop along the path.
    pub(crate) fn admit(&mut self, now: Tick, msg_size: i64) {
        while self.in_bytes + msg_size <= self.in_limit {
            let Some(inbound) = self.in_queue.pop() else {
                break;
            };
            let mut msg = inbound.msg;
            let k = msg.tree;
            msg.time = if self.gc[k] { now + self.gc_delay[k] } else { now };
            self.bufs[k].push_back(msg);
            self.in_bytes += msg_size;
            self.total_in_msgs += 1;
        }
        self.sec.in_bytes += self.in_bytes;
    }

    /// Phase 2: self-generate this node's per-tick quota, round-robining
    /// fresh messages across trees by `(j + now) mod T`.
    pub(crate) fn generate(
        &mut self,
        now: Tick,
        keys: &dyn KeySource,
        tree_count: usize,
        msg_size: i64,
    ) -> Result<(), KeyError> {
        for j in 0..self.msgs_per_tick {
            let tree = ((j + now) % tree_count as i64) as usize;
            let key = keys.next_key()?;
            let time = if self.gc[tree] {
                now + self.gc_delay[tree]
            } else {
                now
            };
            self.bufs[tree].push_back(Message::data(key, time, tree));
            self.total_generated += 1;
        }
        self.sec.self_bytes += self.msgs_per_tick * msg_size;
        Ok(())
    }

    /// Phase 3: absorb duplicate keys into their earliest buffered
    /// occurrence.
    ///
    /// The walk covers exactly the buffer prefix present when it starts,
    /// which includes this tick's generated messages. Physical positions
    /// never move; duplicates become tombstones in place so FIFO emission
    /// order stays meaningful.
    pub(crate) fn compact(&mut self, now: Tick, gc_period: i64, msg_size: i64) {
        if now % gc_period != 0 {
            return;
        }
        for k in 0..self.bufs.len() {
            if !self.gc[k] || self.bufs[k].is_empty() {
                continue;
            }
            let buf = &mut self.bufs[k];
            let window = buf.len();
            let mut first_pos: HashMap<i64, usize> = HashMap::new();
            let mut saved = 0i64;
            for j in 0..window {
                if buf[j].is_tombstone() {
                    continue;
                }
                match first_pos.entry(buf[j].key) {
                    Entry::Occupied(entry) => {
                        let idx = *entry.get();
                        let absorbed = buf[j].eff_size;
                        buf[idx].eff_size += absorbed;
                        buf[j].retire();
                        saved += 1;
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(j);
                    }
                }
            }
            self.sec.saved_bytes += saved * msg_size;
            self.total_saved += saved as u64;
        }
    }

    /// Buffered messages (live and tombstone) on tree `k`.
    pub fn buffered_len(&self, k: usize) -> usize {
        self.bufs[k].len()
    }

    /// Messages waiting in the inbound queue.
    pub fn in_queue_len(&self) -> usize {
        self.in_queue.len()
    }

    /// Sum of `eff_size` over live data held here (buffers plus inbound
    /// queue). Used by the conservation audit.
    pub fn live_effective(&self) -> i64 {
        let buffered: i64 = self
            .bufs
            .iter()
            .flat_map(|buf| buf.iter())
            .filter(|m| !m.is_tombstone())
            .map(|m| m.eff_size)
            .sum();
        let queued: i64 = self
            .in_queue
            .iter()
            .filter(|q| !q.msg.is_tombstone())
            .map(|q| q.msg.eff_size)
            .sum();
        buffered + queued
    }

    /// Count of live data messages held here (buffers plus inbound queue).
    pub fn live_data_messages(&self) -> u64 {
        let buffered = self
            .bufs
            .iter()
            .flat_map(|buf| buf.iter())
            .filter(|m| !m.is_tombstone())
            .count();
        let queued = self
            .in_queue
            .iter()
            .filter(|q| !q.msg.is_tombstone())
            .count();
        (buffered + queued) as u64
    }
}
