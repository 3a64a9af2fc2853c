//! The receive reassembly buffer: out-of-order inbound boxes keyed by
//! sequence number, with contiguous-prefix delivery and resource accounting.

use std::collections::BTreeMap;

use serde_json::Value;

/// Pending-count and pending-bytes caps past which the owning `Stream`
/// performs an internal reset with reason "resources exhausted".
pub const MAX_PENDING_ITEMS: usize = 5000;
pub const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// (ackNumber, sorted out-of-order sequence numbers currently held).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SackInfo {
    pub ack: Option<u64>,
    pub sack: Vec<u64>,
}

/// Out-of-order reassembly buffer for one stream's inbound direction.
#[derive(Debug, Default)]
pub struct Incoming {
    ack: Option<u64>,
    buffered: BTreeMap<u64, (Value, usize)>,
    pending_bytes: usize,
}

impl Incoming {
    pub fn new() -> Self {
        Self { ack: None, buffered: BTreeMap::new(), pending_bytes: 0 }
    }

    /// Accept a batch of (seq, message, byte size) triples. Duplicates
    /// (already delivered, or already buffered) are silently ignored.
    pub fn give(&mut self, items: impl IntoIterator<Item = (u64, Value, usize)>) {
        for (seq, message, memory_size) in items {
            if self.is_already_delivered(seq) {
                continue;
            }
            if self.buffered.contains_key(&seq) {
                continue;
            }
            self.pending_bytes += memory_size;
            self.buffered.insert(seq, (message, memory_size));
        }
    }

    fn is_already_delivered(&self, seq: u64) -> bool {
        matches!(self.ack, Some(ack) if seq <= ack)
    }

    /// Remove and return the maximal contiguous run starting at `ack+1`,
    /// advancing `ack` accordingly.
    pub fn get_deliverable_items(&mut self) -> Vec<(u64, Value)> {
        let mut out = Vec::new();
        let mut next = match self.ack {
            Some(ack) => ack + 1,
            None => 0,
        };
        while let Some((message, memory_size)) = self.buffered.remove(&next) {
            self.pending_bytes -= memory_size;
            out.push((next, message));
            self.ack = Some(next);
            next = match next.checked_add(1) {
                Some(n) => n,
                None => break,
            };
        }
        out
    }

    pub fn get_undelivered_count(&self) -> usize {
        self.buffered.len()
    }

    pub fn get_max_consumption(&self) -> usize {
        self.pending_bytes
    }

    pub fn get_sack(&self) -> SackInfo {
        SackInfo { ack: self.ack, sack: self.buffered.keys().copied().collect() }
    }

    /// True once pending count or pending bytes exceed the resource caps;
    /// the `Stream` checks this after every `give` and internally resets if set.
    pub fn over_caps(&self) -> bool {
        self.buffered.len() > MAX_PENDING_ITEMS || self.pending_bytes > MAX_PENDING_BYTES
    }
}
