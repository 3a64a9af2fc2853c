//! `StreamTracker`: the process-wide directory of live [`Stream`]s, keyed by
//! client-chosen [`StreamId`] under a randomized lookup key so a client can't
//! choose an id designed to collide inside the hash map.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::application::MinervaFactory;
use crate::config::MinervaConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::stream::{Stream, StreamId};
use crate::timers::{DeadlineKind, DeadlineQueue};

/// `prefix ++ id ++ suffix`. The prefix and suffix are fixed, per-tracker
/// random bytes chosen at construction, so the hash map key a client can
/// influence is never the whole key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SafeKey(Vec<u8>);

/// Notified when a stream is created or reaped. Embedders use this for
/// metrics or connection-count bookkeeping; panics inside an observer are
/// caught the same way application callbacks are.
pub trait StreamObserver: Send + Sync {
    fn stream_born(&self, stream: &Arc<Stream>);
    fn stream_died(&self, id: &StreamId);
}

struct TrackerState {
    streams: HashMap<SafeKey, Arc<Stream>>,
    observers: Vec<Arc<dyn StreamObserver>>,
}

/// The directory every `Transport`'s Hello handshake consults to attach to,
/// or create, a stream.
pub struct StreamTracker {
    self_weak: Mutex<Weak<StreamTracker>>,
    factory: Arc<dyn MinervaFactory>,
    config: MinervaConfig,
    prefix: [u8; 3],
    suffix: [u8; 3],
    state: Mutex<TrackerState>,
}

impl StreamTracker {
    /// Builds a tracker with [`MinervaConfig::default`]. Use [`Self::with_config`]
    /// to override the client-inactivity window or resource caps.
    pub fn new(factory: Arc<dyn MinervaFactory>) -> Arc<Self> {
        Self::with_config(factory, MinervaConfig::default())
    }

    pub fn with_config(factory: Arc<dyn MinervaFactory>, config: MinervaConfig) -> Arc<Self> {
        let mut prefix = [0u8; 3];
        let mut suffix = [0u8; 3];
        rand::rng().fill_bytes(&mut prefix);
        rand::rng().fill_bytes(&mut suffix);
        let tracker = Arc::new(Self {
            self_weak: Mutex::new(Weak::new()),
            factory,
            config,
            prefix,
            suffix,
            state: Mutex::new(TrackerState { streams: HashMap::new(), observers: Vec::new() }),
        });
        *tracker.self_weak.lock() = Arc::downgrade(&tracker);
        tracker
    }

    fn arc_self(&self) -> Arc<StreamTracker> {
        self.self_weak.lock().upgrade().expect("tracker outlived its own Arc")
    }

    fn safe_key(&self, id: &StreamId) -> SafeKey {
        let mut key = Vec::with_capacity(3 + id.as_bytes().len() + 3);
        key.extend_from_slice(&self.prefix);
        key.extend_from_slice(id.as_bytes());
        key.extend_from_slice(&self.suffix);
        SafeKey(key)
    }

    pub fn get_stream(&self, id: &StreamId) -> TrackerResult<Arc<Stream>> {
        self.state.lock().streams.get(&self.safe_key(id)).cloned().ok_or(TrackerError::NoSuchStream)
    }

    /// Create a new stream for `id`. Errs with `StreamAlreadyExists` if one
    /// is already tracked. If any observer panics while being notified of
    /// the birth, the stream is removed again and the panic is reported as
    /// [`TrackerError::ObserverFailed`].
    pub fn build_stream(&self, id: StreamId) -> TrackerResult<Arc<Stream>> {
        let key = self.safe_key(&id);
        let stream = Stream::new(id, self.factory.clone(), self.config.client_inactivity_timeout);

        let observers_snapshot = {
            let mut state = self.state.lock();
            if state.streams.contains_key(&key) {
                return Err(TrackerError::StreamAlreadyExists);
            }
            state.streams.insert(key.clone(), stream.clone());
            state.observers.clone()
        };

        let notified = catch_unwind(AssertUnwindSafe(|| {
            for observer in &observers_snapshot {
                observer.stream_born(&stream);
            }
        }));

        if notified.is_err() {
            self.state.lock().streams.remove(&key);
            return Err(TrackerError::ObserverFailed);
        }

        self.schedule_removal_on_finish(key, stream.clone());
        Ok(stream)
    }

    /// `get_stream` if already present, else `build_stream`. What a Hello
    /// with `requestNewStream = true` uses: idempotent on replay.
    pub fn get_or_build_stream(&self, id: StreamId) -> TrackerResult<Arc<Stream>> {
        match self.get_stream(&id) {
            Ok(stream) => Ok(stream),
            Err(TrackerError::NoSuchStream) => self.build_stream(id),
            Err(e) => Err(e),
        }
    }

    pub fn observe_streams(&self, observer: Arc<dyn StreamObserver>) {
        self.state.lock().observers.push(observer);
    }

    pub fn unobserve_streams(&self, observer: &Arc<dyn StreamObserver>) -> TrackerResult<()> {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|o| !Arc::ptr_eq(o, observer));
        if state.observers.len() == before {
            return Err(TrackerError::UnknownObserver);
        }
        Ok(())
    }

    /// Tell every live stream's transports "be right back", then internally
    /// reset each stream once `grace` has elapsed without it having already
    /// torn itself down on its own.
    pub fn begin_shutdown(&self, grace: Duration) {
        let streams: Vec<Arc<Stream>> = self.state.lock().streams.values().cloned().collect();
        if streams.is_empty() {
            return;
        }
        let grace_ms = grace.as_millis() as u64;
        let deadline = tokio::time::Instant::now() + grace;
        let mut queue = DeadlineQueue::new();
        for stream in streams {
            stream.quiesce(grace_ms);
            queue.push(deadline, DeadlineKind::ShutdownGrace, stream);
        }
        tokio::spawn(async move {
            while let Some(next) = queue.next_deadline() {
                tokio::time::sleep_until(next).await;
                for (_, stream) in queue.pop_expired(tokio::time::Instant::now()) {
                    stream.internal_reset("server shutting down");
                }
            }
        });
    }

    fn schedule_removal_on_finish(&self, key: SafeKey, stream: Arc<Stream>) {
        let tracker = self.arc_self();
        let finished = stream.notify_finish();
        tokio::spawn(async move {
            let _ = finished.await;
            tracker.state.lock().streams.remove(&key);
            let id = stream.id().clone();
            let observers_snapshot = tracker.state.lock().observers.clone();
            for observer in &observers_snapshot {
                observer.stream_died(&id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::BasicMinervaFactory;
    use bytes::Bytes;

    fn stream_id(byte: u8) -> StreamId {
        StreamId::new(Bytes::from(vec![byte; 20])).unwrap()
    }

    fn tracker() -> Arc<StreamTracker> {
        StreamTracker::new(Arc::new(BasicMinervaFactory))
    }

    #[tokio::test]
    async fn build_then_get_returns_same_stream() {
        let tracker = tracker();
        let id = stream_id(b'a');
        let built = tracker.build_stream(id.clone()).unwrap();
        let fetched = tracker.get_stream(&id).unwrap();
        assert!(Arc::ptr_eq(&built, &fetched));
    }

    #[tokio::test]
    async fn build_twice_errors() {
        let tracker = tracker();
        let id = stream_id(b'b');
        tracker.build_stream(id.clone()).unwrap();
        assert!(matches!(tracker.build_stream(id), Err(TrackerError::StreamAlreadyExists)));
    }

    #[test]
    fn get_unknown_errors() {
        let tracker = tracker();
        assert!(matches!(tracker.get_stream(&stream_id(b'c')), Err(TrackerError::NoSuchStream)));
    }

    #[tokio::test]
    async fn get_or_build_is_idempotent() {
        let tracker = tracker();
        let id = stream_id(b'd');
        let first = tracker.get_or_build_stream(id.clone()).unwrap();
        let second = tracker.get_or_build_stream(id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unobserve_unknown_observer_errors() {
        struct NoopObserver;
        impl StreamObserver for NoopObserver {
            fn stream_born(&self, _stream: &Arc<Stream>) {}
            fn stream_died(&self, _id: &StreamId) {}
        }
        let tracker = tracker();
        let observer: Arc<dyn StreamObserver> = Arc::new(NoopObserver);
        assert!(matches!(tracker.unobserve_streams(&observer), Err(TrackerError::UnknownObserver)));
    }

    #[tokio::test]
    async fn stream_is_reaped_from_directory_on_finish() {
        let tracker = tracker();
        let id = stream_id(b'e');
        let stream = tracker.build_stream(id.clone()).unwrap();
        stream.reset("done").unwrap();
        // Give the reaper task a chance to run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(matches!(tracker.get_stream(&id), Err(TrackerError::NoSuchStream)));
    }
}
