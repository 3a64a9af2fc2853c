//! The outbound send queue: a contiguous run of (seq, message) pairs from a
//! monotonic base, pruned as the client acknowledges them.

use std::collections::VecDeque;

use serde_json::Value;

use crate::error::{MinervaError, Result};

/// Ordered buffer of outbound messages awaiting acknowledgement.
#[derive(Debug, Default)]
pub struct SendQueue {
    base: u64,
    items: VecDeque<Value>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self { base: 0, items: VecDeque::new() }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn length(&self) -> usize {
        self.items.len()
    }

    /// One past the last assigned sequence number.
    fn end(&self) -> u64 {
        self.base + self.items.len() as u64
    }

    /// Append messages, assigning them consecutive sequence numbers starting
    /// at the current `base + length`.
    pub fn extend(&mut self, items: impl IntoIterator<Item = Value>) {
        self.items.extend(items);
    }

    /// Lazily iterate (seq, message) pairs with seq ≥ `start` (`None` means
    /// "from base").
    pub fn iter_items(&self, start: Option<u64>) -> impl Iterator<Item = (u64, &Value)> {
        let start = start.unwrap_or(self.base).max(self.base);
        let skip = (start - self.base) as usize;
        self.items.iter().enumerate().skip(skip).map(move |(i, v)| (self.base + i as u64, v))
    }

    /// Remove every seq ≤ `ack` and every seq named in `sack_list`.
    ///
    /// Fails with [`MinervaError::InvalidSack`] if `ack` or any `sack_list`
    /// member names a sequence that was never sent (≥ `base + length`).
    pub fn handle_sack(&mut self, ack: Option<u64>, sack_list: &[u64]) -> Result<()> {
        let end = self.end();
        if let Some(ack) = ack {
            if ack >= end {
                return Err(MinervaError::InvalidSack);
            }
        }
        for &seq in sack_list {
            if seq >= end {
                return Err(MinervaError::InvalidSack);
            }
        }

        if let Some(ack) = ack {
            if ack + 1 > self.base {
                let drop_count = (ack + 1 - self.base) as usize;
                self.items.drain(..drop_count);
                self.base = ack + 1;
            }
        }

        if !sack_list.is_empty() {
            let sacked: std::collections::BTreeSet<u64> = sack_list.iter().copied().collect();
            let base = self.base;
            let mut i = 0;
            self.items.retain(|_| {
                let seq = base + i;
                i += 1;
                !sacked.contains(&seq)
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded(n: u64) -> SendQueue {
        let mut q = SendQueue::new();
        q.extend((0..n).map(|i| json!(i)));
        q
    }

    #[test]
    fn extend_assigns_consecutive_sequences() {
        let q = seeded(3);
        let items: Vec<_> = q.iter_items(None).collect();
        assert_eq!(items, vec![(0, &json!(0)), (1, &json!(1)), (2, &json!(2))]);
    }

    #[test]
    fn handle_sack_ack_prunes_prefix() {
        let mut q = seeded(5);
        q.handle_sack(Some(2), &[]).unwrap();
        assert_eq!(q.base(), 3);
        assert_eq!(q.length(), 2);
    }

    #[test]
    fn handle_sack_removes_noncontiguous_entries() {
        let mut q = seeded(5);
        q.handle_sack(None, &[1, 3]).unwrap();
        let remaining: Vec<_> = q.iter_items(None).map(|(seq, _)| seq).collect();
        assert_eq!(remaining, vec![0, 2, 4]);
    }

    #[test]
    fn handle_sack_rejects_unsent_ack() {
        let mut q = seeded(0);
        assert!(matches!(q.handle_sack(Some(0), &[]), Err(MinervaError::InvalidSack)));
    }

    #[test]
    fn handle_sack_rejects_unsent_sack_list_entry() {
        let mut q = seeded(2);
        assert!(matches!(q.handle_sack(None, &[5]), Err(MinervaError::InvalidSack)));
    }

    #[test]
    fn iter_items_from_start_skips_acked_prefix() {
        let q = seeded(5);
        let items: Vec<_> = q.iter_items(Some(3)).map(|(seq, _)| seq).collect();
        assert_eq!(items, vec![3, 4]);
    }
}
