//! Error taxonomy for the Minerva core.
//!
//! Split into two enums on purpose: [`MinervaError`] covers wire/protocol
//! failures handled by a [`crate::transport::Transport`] (almost always by
//! emitting a `tk_*` frame and terminating), while [`TrackerError`] covers
//! the stream directory's own usage errors. The two are raised by different
//! callers and conflating them would blur that boundary.

use thiserror::Error;

/// Wire- and protocol-level errors.
#[derive(Debug, Error)]
pub enum MinervaError {
    #[error("frame corruption: {0}")]
    FrameCorruption(String),

    #[error("intraframe corruption: payload was not exhaustively consumable JSON")]
    IntraframeCorruption,

    #[error("bad frame: {0}")]
    BadFrame(String),

    #[error("invalid hello: {0}")]
    InvalidHello(String),

    #[error("stream attach failure: no such stream")]
    StreamAttachFailure,

    #[error("client acknowledged unsent sequence numbers")]
    InvalidSack,

    #[error("resources exhausted")]
    ResourcesExhausted,

    #[error("stream is disconnected")]
    Disconnected,

    #[error("a producer is already registered; unregister it first")]
    ProducerAlreadyRegistered,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MinervaError>;

/// [`crate::tracker::StreamTracker`] usage errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no such stream")]
    NoSuchStream,

    #[error("stream already exists")]
    StreamAlreadyExists,

    #[error("observer is not currently registered")]
    UnknownObserver,

    #[error("a stream observer panicked during notification")]
    ObserverFailed,
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
