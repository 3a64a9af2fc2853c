//! `Stream`: the per-client reliable channel. Owns one [`Incoming`] buffer
//! and one [`SendQueue`], tracks attached transports, elects a primary, and
//! mediates backpressure and reset between the application and the wire.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::application::{guarded, MinervaFactory, MinervaProtocol, StreamHandle, WhoReset};
use crate::error::{MinervaError, Result};
use crate::incoming::{Incoming, SackInfo};
use crate::send_queue::SendQueue;

/// Opaque, client-chosen stream identifier: 20–30 bytes, ASCII only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(Bytes);

impl StreamId {
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if !(20..=30).contains(&bytes.len()) {
            return Err(MinervaError::InvalidHello(format!(
                "stream id length {} not in [20, 30]",
                bytes.len()
            )));
        }
        if bytes.iter().any(|&b| b > 127) {
            return Err(MinervaError::InvalidHello("stream id must be ASCII".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// The narrow capability set a `Stream` needs from a transport, per the
/// design note that the specific framing variant must stay an internal
/// detail of the transport.
pub trait StreamTransport: Send + Sync {
    fn transport_number(&self) -> u64;
    /// −1 (`None`) or the last sequence number this transport has written.
    fn last_box_sent(&self) -> Option<u64>;
    fn write_boxes(&self, items: &[(u64, Value)]);
    fn write_sack(&self, sack: SackInfo);
    fn write_reset(&self, reason: &str, application_level: bool);
    fn write_you_close_it(&self);
    /// `tk_brb`: tell the client to reconnect after `grace_ms`, used only by
    /// [`crate::tracker::StreamTracker::begin_shutdown`]. Not part of the
    /// spec's narrow capability set — added for the shutdown-quiescing
    /// feature carried over from the original implementation.
    fn write_brb(&self, grace_ms: u64);
    fn register_producer(&self, streaming: bool);
    fn unregister_producer(&self);
}

/// The application-side producer/consumer backpressure bridge (§5).
pub trait Producer: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

struct Inner {
    send_queue: SendQueue,
    incoming: Incoming,
    transports: Vec<Arc<dyn StreamTransport>>,
    primary: Option<Arc<dyn StreamTransport>>,
    producer: Option<(Arc<dyn Producer>, bool)>,
    primary_paused: bool,
    disconnected: bool,
    virgin: bool,
    application: Option<Box<dyn MinervaProtocol>>,
    pretend_acked: Option<u64>,
    notifications: Vec<oneshot::Sender<()>>,
    /// Bumped every time `transports` transitions to or from empty;
    /// invalidates any in-flight client-inactivity timeout scheduled against
    /// an earlier generation, without needing to cancel its task.
    inactivity_generation: u64,
}

/// The reliable channel bound to one client-chosen [`StreamId`].
pub struct Stream {
    id: StreamId,
    factory: Arc<dyn MinervaFactory>,
    self_weak: Weak<Stream>,
    /// How long this stream may sit with zero attached transports before it
    /// times out with reason "timeout" (spec §5).
    client_inactivity_timeout: Duration,
    inner: Mutex<Inner>,
}

impl Stream {
    pub fn new(id: StreamId, factory: Arc<dyn MinervaFactory>, client_inactivity_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            factory,
            self_weak: weak.clone(),
            client_inactivity_timeout,
            inner: Mutex::new(Inner {
                send_queue: SendQueue::new(),
                incoming: Incoming::new(),
                transports: Vec::new(),
                primary: None,
                producer: None,
                primary_paused: false,
                disconnected: false,
                virgin: true,
                application: None,
                pretend_acked: None,
                notifications: Vec::new(),
                inactivity_generation: 0,
            }),
        })
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().disconnected
    }

    pub fn is_virgin(&self) -> bool {
        self.inner.lock().virgin
    }

    /// Enqueue boxes and attempt an immediate flush to the primary.
    pub fn send_boxes(&self, items: Vec<Value>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(MinervaError::Disconnected);
        }
        inner.send_queue.extend(items);
        Self::try_to_send(&mut inner);
        Ok(())
    }

    /// Application-initiated reset. Errors if already disconnected.
    pub fn reset(&self, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(MinervaError::Disconnected);
        }
        Self::perform_reset(&mut inner, WhoReset::ServerApp, reason, Some(true));
        Ok(())
    }

    /// Minerva-initiated reset (resource exhaustion, timeouts). A no-op if
    /// the stream is already disconnected.
    pub fn internal_reset(&self, reason: &str) {
        let mut inner = self.inner.lock();
        Self::perform_reset(&mut inner, WhoReset::ServerMinerva, reason, Some(false));
    }

    /// Register a future fired exactly once, with no value, at stream end.
    pub fn notify_finish(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.disconnected {
            let _ = tx.send(());
        } else {
            inner.notifications.push(tx);
        }
        rx
    }

    /// Errs with [`MinervaError::ProducerAlreadyRegistered`] if a producer is
    /// already registered without an intervening `unregister_producer` — the
    /// original implementation's `registerProducer` raises in this case
    /// rather than silently replacing it.
    pub fn register_producer(&self, producer: Arc<dyn Producer>, streaming: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.producer.is_some() {
            return Err(MinervaError::ProducerAlreadyRegistered);
        }
        let should_pause = streaming && (inner.primary.is_none() || inner.primary_paused);
        inner.producer = Some((producer.clone(), streaming));
        if should_pause {
            producer.pause();
        }
        Ok(())
    }

    pub fn unregister_producer(&self) {
        self.inner.lock().producer = None;
    }

    pub fn get_sack(&self) -> SackInfo {
        self.inner.lock().incoming.get_sack()
    }

    /// Tell every attached transport the server is shutting down; the caller
    /// is responsible for scheduling the follow-up internal reset.
    pub fn quiesce(&self, grace_ms: u64) {
        let inner = self.inner.lock();
        for transport in &inner.transports {
            transport.write_brb(grace_ms);
        }
    }

    /// A previously-primary transport lost TCP write readiness; propagate
    /// the pause to the application's streaming producer, if any.
    pub fn primary_paused(&self) {
        let mut inner = self.inner.lock();
        inner.primary_paused = true;
        if let Some((producer, true)) = &inner.producer {
            producer.pause();
        }
    }

    /// The primary transport regained TCP write readiness.
    pub fn primary_resumed(&self) {
        let mut inner = self.inner.lock();
        inner.primary_paused = false;
        if let Some((producer, true)) = &inner.producer {
            producer.resume();
        }
    }

    pub fn transport_online(&self, transport: Arc<dyn StreamTransport>) {
        let mut inner = self.inner.lock();
        inner.transports.push(transport);
        // Invalidate any client-inactivity timeout scheduled while this
        // stream had zero transports attached.
        inner.inactivity_generation += 1;
        inner.virgin = false;
        if inner.application.is_none() {
            let mut app = self.factory.build_protocol();
            let handle = StreamHandle(self.id.clone());
            guarded("stream_started", || app.stream_started(&handle));
            inner.application = Some(app);
        }
    }

    pub fn transport_offline(&self, transport_number: u64) {
        let mut inner = self.inner.lock();
        inner.transports.retain(|t| t.transport_number() != transport_number);
        let was_primary = matches!(&inner.primary, Some(p) if p.transport_number() == transport_number);
        if was_primary {
            if let Some(primary) = inner.primary.take() {
                primary.unregister_producer();
            }
            inner.primary_paused = false;
            if let Some((producer, true)) = &inner.producer {
                producer.pause();
            }
        }
        if inner.transports.is_empty() {
            inner.inactivity_generation += 1;
            let generation = inner.inactivity_generation;
            drop(inner);
            self.schedule_inactivity_timeout(generation);
        }
    }

    /// Reset the stream with reason "timeout" if it still has zero attached
    /// transports and no newer attach/detach has superseded `generation` by
    /// the time `client_inactivity_timeout` elapses.
    fn schedule_inactivity_timeout(&self, generation: u64) {
        let Some(stream) = self.self_weak.upgrade() else { return };
        let timeout = self.client_inactivity_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fire = {
                let inner = stream.inner.lock();
                !inner.disconnected && inner.transports.is_empty() && inner.inactivity_generation == generation
            };
            if fire {
                stream.internal_reset("timeout");
            }
        });
    }

    /// `t` requests to become the S2C delivery transport. See spec §4.4's
    /// primary election / "succeeds" handoff rules.
    pub fn subscribe_to_boxes(&self, transport: Arc<dyn StreamTransport>, succeeds_transport: Option<u64>) {
        let mut inner = self.inner.lock();
        match inner.primary.take() {
            Some(old_primary) => {
                if succeeds_transport == Some(old_primary.transport_number()) {
                    if let Some(last) = old_primary.last_box_sent() {
                        inner.pretend_acked = Some(last);
                    }
                }
                old_primary.write_you_close_it();
                if let Some((_, streaming)) = inner.producer {
                    old_primary.unregister_producer();
                    transport.register_producer(streaming);
                }
                let was_paused = inner.primary_paused;
                inner.primary = Some(transport);
                inner.primary_paused = false;
                if was_paused {
                    if let Some((producer, true)) = &inner.producer {
                        producer.resume();
                    }
                }
            }
            None => {
                if let Some((_, streaming)) = inner.producer {
                    transport.register_producer(streaming);
                }
                inner.primary = Some(transport);
                if let Some((producer, true)) = &inner.producer {
                    producer.resume();
                }
            }
        }
        Self::try_to_send(&mut inner);
    }

    pub fn boxes_received(&self, items: Vec<(u64, Value, usize)>) {
        let mut inner = self.inner.lock();
        inner.incoming.give(items);
        let deliverable = inner.incoming.get_deliverable_items();
        if !deliverable.is_empty() {
            if let Some(app) = inner.application.as_mut() {
                guarded("boxes_received", || app.boxes_received(deliverable));
            }
        }
        if inner.incoming.over_caps() {
            Self::perform_reset(&mut inner, WhoReset::ServerMinerva, "resources exhausted", Some(false));
        }
    }

    pub fn sack_received(&self, ack: Option<u64>, sack_list: &[u64]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pretend_acked = None;
        inner.send_queue.handle_sack(ack, sack_list)?;
        Self::try_to_send(&mut inner);
        Ok(())
    }

    pub fn reset_from_client(&self, reason: &str, application_level: bool) {
        let mut inner = self.inner.lock();
        let who = if application_level { WhoReset::ClientApp } else { WhoReset::ClientMinerva };
        Self::perform_reset(&mut inner, who, reason, None);
    }

    fn try_to_send(inner: &mut Inner) {
        if inner.send_queue.length() == 0 {
            return;
        }
        let Some(primary) = inner.primary.clone() else {
            return;
        };
        let start = match inner.pretend_acked {
            None => None,
            Some(pretend_acked) => {
                let end = inner.send_queue.base() + inner.send_queue.length() as u64;
                if end <= pretend_acked + 1 {
                    return;
                }
                Some((pretend_acked + 1).max(inner.send_queue.base()))
            }
        };
        let items: Vec<(u64, Value)> =
            inner.send_queue.iter_items(start).map(|(seq, v)| (seq, v.clone())).collect();
        primary.write_boxes(&items);
    }

    /// `write_reset_frame`: `Some(application_level)` writes a reset frame
    /// before `you_close_it`; `None` (the client already sent one) writes
    /// only `you_close_it`.
    fn perform_reset(inner: &mut Inner, who: WhoReset, reason: &str, write_reset_frame: Option<bool>) {
        if inner.disconnected {
            return;
        }
        inner.disconnected = true;
        for transport in &inner.transports {
            if let Some(application_level) = write_reset_frame {
                transport.write_reset(reason, application_level);
            }
            transport.write_you_close_it();
        }
        for sender in inner.notifications.drain(..) {
            let _ = sender.send(());
        }
        if let Some(mut app) = inner.application.take() {
            let reason = reason.to_string();
            guarded("stream_reset", || app.stream_reset(who, &reason));
        }
    }
}
