//! Minerva: reliable, ordered, bidirectional message delivery between a
//! browser and a server over transports that are individually unreliable,
//! short-lived, or half-duplex (raw sockets, long-polling HTTP, iframe
//! streaming).
//!
//! A [`tracker::StreamTracker`] owns every live [`stream::Stream`]. Each
//! `Stream` is addressed by a client-chosen [`stream::StreamId`] and is fed
//! by a sequence of [`transport::Transport`]s over its lifetime — never more
//! than one of which is primary (the one eligible to carry server-to-client
//! boxes) at a time.

pub mod application;
pub mod config;
pub mod error;
pub mod frame;
pub mod framing;
pub mod hello;
pub mod http;
pub mod incoming;
pub mod policy;
pub mod send_queue;
pub mod stream;
pub mod timers;
pub mod tracker;
pub mod transport;

pub use application::{BasicMinervaFactory, BasicMinervaProtocol, MinervaFactory, MinervaProtocol, StreamHandle, WhoReset};
pub use config::MinervaConfig;
pub use error::{MinervaError, Result, TrackerError, TrackerResult};
pub use stream::{Stream, StreamId, StreamTransport};
pub use tracker::StreamTracker;
pub use transport::{AuthCallback, Transport};
