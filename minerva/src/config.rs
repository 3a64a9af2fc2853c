//! Ambient, process-wide configuration and resource-cap defaults.

use std::time::Duration;

/// Knobs governing a single [`crate::tracker::StreamTracker`] and the
/// streams/transports it owns. Mirrors spec-level defaults; an embedder may
/// override any of them at construction.
#[derive(Debug, Clone)]
pub struct MinervaConfig {
    /// How long a stream waits with zero attached transports before it
    /// times out with reason "timeout".
    pub client_inactivity_timeout: Duration,
    /// Soft cap on a single frame's payload length (see [`crate::framing`]).
    pub max_frame_length: usize,
    /// Pending-item cap on [`crate::incoming::Incoming`] before an internal reset.
    pub max_pending_items: usize,
    /// Pending-byte cap on [`crate::incoming::Incoming`] before an internal reset.
    pub max_pending_bytes: usize,
}

impl Default for MinervaConfig {
    fn default() -> Self {
        Self {
            client_inactivity_timeout: Duration::from_secs(30),
            max_frame_length: crate::framing::MAX_FRAME_LENGTH,
            max_pending_items: crate::incoming::MAX_PENDING_ITEMS,
            max_pending_bytes: crate::incoming::MAX_PENDING_BYTES,
        }
    }
}
