//! The application adapter: the pluggable boundary between a `Stream` and
//! user code. A `MinervaFactory` builds one `MinervaProtocol` per stream.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;

/// Who initiated a stream reset, mirroring the four call sites a reset can
/// originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhoReset {
    /// The application called `Stream::reset`.
    ServerApp,
    /// Minerva itself reset the stream (resource exhaustion, timeout).
    ServerMinerva,
    /// The client sent an application-level reset frame.
    ClientApp,
    /// The client sent a reset frame, or the transport layer inferred one.
    ClientMinerva,
}

/// A handle identifying the stream a `MinervaProtocol` is bound to, passed
/// to `stream_started` so the application can retain it for outbound sends
/// issued from outside the inbound-frame callback path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub(crate) crate::stream::StreamId);

/// Application-supplied handler for one stream's lifetime.
///
/// All three methods are synchronous; panics inside them are caught and
/// logged by the core rather than propagated, per the spec's requirement
/// that application exceptions never prevent transport teardown.
pub trait MinervaProtocol: Send {
    fn stream_started(&mut self, stream: &StreamHandle);
    fn stream_reset(&mut self, who: WhoReset, reason: &str);
    fn boxes_received(&mut self, boxes: Vec<(u64, Value)>);
}

/// A no-op default, useful for tests and stubs.
#[derive(Debug, Default)]
pub struct BasicMinervaProtocol;

impl MinervaProtocol for BasicMinervaProtocol {
    fn stream_started(&mut self, _stream: &StreamHandle) {}
    fn stream_reset(&mut self, _who: WhoReset, _reason: &str) {}
    fn boxes_received(&mut self, _boxes: Vec<(u64, Value)>) {}
}

/// Produces one `MinervaProtocol` per stream.
pub trait MinervaFactory: Send + Sync {
    fn build_protocol(&self) -> Box<dyn MinervaProtocol>;
}

/// A factory that always hands back [`BasicMinervaProtocol`].
#[derive(Debug, Default)]
pub struct BasicMinervaFactory;

impl MinervaFactory for BasicMinervaFactory {
    fn build_protocol(&self) -> Box<dyn MinervaProtocol> {
        Box::new(BasicMinervaProtocol)
    }
}

/// Invoke an application callback, catching and logging any panic instead of
/// letting it unwind into the core. Used by `Stream` at every call site that
/// crosses into application code (`stream_started`, `stream_reset`,
/// `boxes_received`).
pub(crate) fn guarded<F: FnOnce()>(site: &'static str, f: F) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(site, message, "application callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_catches_panics() {
        let mut ran_after = false;
        guarded("test", || panic!("boom"));
        ran_after = true;
        assert!(ran_after);
    }

    #[test]
    fn basic_protocol_is_inert() {
        let mut protocol = BasicMinervaProtocol;
        protocol.boxes_received(vec![(0, serde_json::json!("x"))]);
        protocol.stream_reset(WhoReset::ServerApp, "done");
    }
}
