//! Earliest-deadline-first scheduling for batched, one-shot deadlines — used
//! by [`crate::tracker::StreamTracker::begin_shutdown`] to quiesce every live
//! stream at once and fire each one's reset after a shared grace period.
//!
//! The other two timeouts in spec §5 (client inactivity, a transport's
//! Hello-negotiated `maxOpenTime`) are per-entity and cancellable — a stream
//! can reattach before its window elapses, a transport's timer is never
//! superseded — so they're scheduled with a direct `tokio::spawn` plus a
//! generation counter instead of this queue; see `Stream::transport_offline`
//! and `Transport::handle_hello`. `maxReceiveBytes` bounds bytes written, not
//! elapsed time, so it's a synchronous counter in `Transport`, not a
//! deadline at all. See `DESIGN.md` for the reasoning.
//!
//! The heap shape (reversed `Ord` so the earliest `Instant` sorts first) is
//! the same one a per-packet retransmission scheduler would use; here it
//! schedules stream-level deadlines instead of packet retries.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// What kind of deadline is firing. Carried alongside an embedder-supplied
/// identifier (`T`) so a single queue can multiplex several deadline kinds
/// for many streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    /// A stream's post-`tk_brb` shutdown grace period has elapsed.
    ShutdownGrace,
}

struct Entry<T> {
    at: Instant,
    seq: u64,
    kind: DeadlineKind,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts highest.
        Reverse(self.at).cmp(&Reverse(other.at)).then_with(|| Reverse(self.seq).cmp(&Reverse(other.seq)))
    }
}

/// A priority queue of deadlines, earliest first.
pub struct DeadlineQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DeadlineQueue<T> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    pub fn push(&mut self, at: Instant, kind: DeadlineKind, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { at, seq, kind, payload });
    }

    /// The earliest scheduled deadline, if any — for sizing the next
    /// `tokio::time::sleep_until` wait.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.at)
    }

    /// Remove and return every entry whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(DeadlineKind, T)> {
        let mut out = Vec::new();
        while matches!(self.heap.peek(), Some(e) if e.at <= now) {
            let entry = self.heap.pop().expect("peek just confirmed an entry");
            out.push((entry.kind, entry.payload));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn pops_only_expired_entries_in_deadline_order() {
        let start = Instant::now();
        let mut q = DeadlineQueue::new();
        q.push(start + Duration::from_secs(30), DeadlineKind::ShutdownGrace, "stream-a");
        q.push(start + Duration::from_secs(10), DeadlineKind::ShutdownGrace, "stream-b");

        assert_eq!(q.next_deadline(), Some(start + Duration::from_secs(10)));

        let expired = q.pop_expired(start + Duration::from_secs(15));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0], (DeadlineKind::ShutdownGrace, "stream-b"));
        assert_eq!(q.len(), 1);

        let expired = q.pop_expired(start + Duration::from_secs(30));
        assert_eq!(expired, vec![(DeadlineKind::ShutdownGrace, "stream-a")]);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ties_pop_in_insertion_order() {
        let at = Instant::now();
        let mut q = DeadlineQueue::new();
        q.push(at, DeadlineKind::ShutdownGrace, 1);
        q.push(at, DeadlineKind::ShutdownGrace, 2);
        let expired = q.pop_expired(at);
        assert_eq!(expired, vec![(DeadlineKind::ShutdownGrace, 1), (DeadlineKind::ShutdownGrace, 2)]);
    }
}
