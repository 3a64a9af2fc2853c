//! `Transport`: one physical connection (a raw socket, or one HTTP request
//! on a long-lived polling channel). Owns wire-mode detection, the
//! length-prefix decoder, the Hello-gated authorizing substate, and
//! implements [`StreamTransport`] so a [`Stream`] can address it without
//! knowing which framing it actually speaks.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MinervaError, Result};
use crate::frame::Frame;
use crate::framing::{sniff_mode, FrameDecoder, LengthFraming, ModeSniff, TransportMode, MAX_FRAME_LENGTH};
use crate::hello::Hello;
use crate::incoming::SackInfo;
use crate::policy::PolicyResponder;
use crate::stream::{Stream, StreamId, StreamTransport};
use crate::tracker::StreamTracker;

/// Returned by the embedder's authorization callback.
#[derive(Debug, thiserror::Error)]
#[error("authorization rejected: {0}")]
pub struct AuthError(pub String);

type AuthFuture = Pin<Box<dyn Future<Output = std::result::Result<(), AuthError>> + Send>>;

/// Invoked once per Hello with the stream id and `credentialsData`; resolves
/// to accept or reject the handshake. Frames arriving while this is pending
/// are buffered and dispatched in order once it resolves (spec's resolved
/// Open Question on the authorizing substate).
pub type AuthCallback = Arc<dyn Fn(&StreamId, &Value) -> AuthFuture + Send + Sync>;

/// An `AuthCallback` that accepts every Hello unconditionally.
pub fn accept_all() -> AuthCallback {
    Arc::new(|_id, _creds| Box::pin(async { Ok(()) }))
}

enum Attach {
    AwaitingHello,
    Authorizing { queued: Vec<Frame> },
    Attached(Arc<Stream>),
}

struct Inner {
    mode: TransportMode,
    decoder: Option<FrameDecoder>,
    sniff_buf: Vec<u8>,
    attach: Attach,
    got_hello: bool,
    terminating: bool,
    last_box_sent: Option<u64>,
    /// Hello's `r` (`maxReceiveBytes`): bounds bytes written on this
    /// transport before it gently closes itself (spec §5). `None` on
    /// non-HTTP transports that never sent it.
    max_receive_bytes: Option<u64>,
    /// Total outbound (length-prefixed) bytes written so far.
    bytes_sent: u64,
}

/// One physical connection speaking the Minerva wire protocol.
pub struct Transport {
    self_weak: Weak<Transport>,
    transport_number: u64,
    policy_responder: Option<Arc<PolicyResponder>>,
    auth_callback: AuthCallback,
    tracker: Arc<StreamTracker>,
    outbound: SegQueue<Bytes>,
    inner: Mutex<Inner>,
}

impl Transport {
    /// A raw socket transport: mode is sniffed from the first bytes received.
    pub fn new_socket(
        transport_number: u64,
        policy_responder: Option<Arc<PolicyResponder>>,
        auth_callback: AuthCallback,
        tracker: Arc<StreamTracker>,
    ) -> Arc<Self> {
        Self::new(transport_number, policy_responder, auth_callback, tracker, TransportMode::Unknown)
    }

    /// An HTTP transport: mode is fixed by the endpoint the request landed
    /// on, never sniffed.
    pub fn new_http(transport_number: u64, auth_callback: AuthCallback, tracker: Arc<StreamTracker>) -> Arc<Self> {
        Self::new(transport_number, None, auth_callback, tracker, TransportMode::Http)
    }

    fn new(
        transport_number: u64,
        policy_responder: Option<Arc<PolicyResponder>>,
        auth_callback: AuthCallback,
        tracker: Arc<StreamTracker>,
        mode: TransportMode,
    ) -> Arc<Self> {
        let decoder = match mode {
            TransportMode::Http => Some(FrameDecoder::new(LengthFraming::NoTrailer, MAX_FRAME_LENGTH)),
            _ => None,
        };
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            transport_number,
            policy_responder,
            auth_callback,
            tracker,
            outbound: SegQueue::new(),
            inner: Mutex::new(Inner {
                mode,
                decoder,
                sniff_buf: Vec::new(),
                attach: Attach::AwaitingHello,
                got_hello: false,
                terminating: false,
                last_box_sent: None,
                max_receive_bytes: None,
                bytes_sent: 0,
            }),
        })
    }

    fn arc_self(&self) -> Arc<Transport> {
        self.self_weak.upgrade().expect("transport outlived its own Arc")
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.lock().terminating
    }

    /// Pop one already-framed outbound chunk, if any is queued.
    pub fn pop_outbound(&self) -> Option<Bytes> {
        self.outbound.pop()
    }

    fn enqueue_frame(&self, frame: &Frame) {
        let Ok(payload) = frame.encode() else { return };
        let mode = self.inner.lock().mode;
        let mut out = Vec::with_capacity(payload.len() + 12);
        out.extend_from_slice(payload.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(&payload);
        if mode == TransportMode::LengthPrefixA {
            out.push(b',');
        }
        let written = out.len() as u64;
        self.outbound.push(Bytes::from(out));

        // Hello's `maxReceiveBytes` bounds bytes written on this transport
        // (spec §5) — once it's reached the transport gently closes itself.
        let over_cap = {
            let mut inner = self.inner.lock();
            inner.bytes_sent += written;
            matches!(inner.max_receive_bytes, Some(cap) if inner.bytes_sent > cap) && !inner.terminating
        };
        if over_cap && !matches!(frame, Frame::YouCloseIt) {
            self.write_you_close_it();
        }
    }

    fn kill(&self, frame: Frame) {
        self.enqueue_frame(&frame);
        self.enqueue_frame(&Frame::YouCloseIt);
        self.inner.lock().terminating = true;
    }

    /// Feed freshly-read bytes from the wire. Drives mode sniffing, frame
    /// decoding, and dispatch; any protocol error has already resulted in
    /// the appropriate `tk_*` kill frame being queued before it's returned.
    pub fn receive_bytes(&self, data: &[u8]) -> Result<()> {
        if self.inner.lock().terminating {
            return Ok(());
        }

        let payloads = {
            let mut inner = self.inner.lock();
            if inner.mode == TransportMode::Unknown {
                inner.sniff_buf.extend_from_slice(data);
                match sniff_mode(&inner.sniff_buf) {
                    ModeSniff::NeedMoreBytes => return Ok(()),
                    ModeSniff::Reject => {
                        inner.terminating = true;
                        return Err(MinervaError::BadFrame("no transport mode sentinel matched".into()));
                    }
                    ModeSniff::Matched { mode, consumed } => {
                        let remainder = inner.sniff_buf.split_off(consumed);
                        inner.sniff_buf.clear();
                        inner.mode = mode;
                        if mode == TransportMode::PolicyFile {
                            inner.terminating = true;
                            if let Some(responder) = &self.policy_responder {
                                self.outbound.push(responder.encode());
                            }
                            return Ok(());
                        }
                        let framing = match mode {
                            TransportMode::LengthPrefixA => LengthFraming::TrailerComma,
                            _ => LengthFraming::NoTrailer,
                        };
                        let mut decoder = FrameDecoder::new(framing, MAX_FRAME_LENGTH);
                        decoder.push(&remainder);
                        inner.decoder = Some(decoder);
                    }
                }
            } else if let Some(decoder) = inner.decoder.as_mut() {
                decoder.push(data);
            }

            let mut payloads = Vec::new();
            loop {
                match inner.decoder.as_mut().expect("decoder set once mode resolved").next_payload() {
                    Ok(Some(payload)) => payloads.push(payload),
                    Ok(None) => break,
                    Err(e) => {
                        inner.terminating = true;
                        drop(inner);
                        self.enqueue_frame(&Frame::TkFrameCorruption);
                        self.enqueue_frame(&Frame::YouCloseIt);
                        return Err(e);
                    }
                }
            }
            payloads
        };

        self.frames_received(payloads)
    }

    fn frames_received(&self, payloads: Vec<Vec<u8>>) -> Result<()> {
        let mut ready = Vec::new();

        for payload in payloads {
            let frame = match Frame::decode(&payload) {
                Ok(f) => f,
                Err(MinervaError::IntraframeCorruption) => {
                    self.kill(Frame::TkIntraframeCorruption);
                    return Err(MinervaError::IntraframeCorruption);
                }
                Err(_) => {
                    self.kill(Frame::TkInvalidFrameTypeOrArguments);
                    return Err(MinervaError::BadFrame("malformed frame".into()));
                }
            };

            let got_hello = self.inner.lock().got_hello;
            if !got_hello {
                match frame {
                    Frame::Hello(value) => {
                        self.handle_hello(value)?;
                        continue;
                    }
                    _ => {
                        self.kill(Frame::TkInvalidFrameTypeOrArguments);
                        return Err(MinervaError::BadFrame("frame received before hello".into()));
                    }
                }
            }
            if matches!(frame, Frame::Hello(_)) {
                self.kill(Frame::TkInvalidFrameTypeOrArguments);
                return Err(MinervaError::BadFrame("duplicate hello".into()));
            }

            {
                let mut inner = self.inner.lock();
                if let Attach::Authorizing { queued } = &mut inner.attach {
                    queued.push(frame);
                    continue;
                }
            }

            ready.push(frame);
        }

        self.dispatch_batch(ready)
    }

    /// Dispatch a batch of already-authorized frames, writing one coalesced
    /// SACK afterward if any `Boxes` frame was among them — the "one sack per
    /// inbound batch" invariant (spec §5), shared by the normal inbound path
    /// (`frames_received`) and the authorizing-substate replay
    /// (`finish_authorization`) so Boxes sent during the Hello-auth window
    /// are acknowledged as soon as authorization resolves, not whenever some
    /// later unrelated batch happens to set `sack_dirty`.
    fn dispatch_batch(&self, frames: Vec<Frame>) -> Result<()> {
        let mut sack_dirty = false;
        for frame in frames {
            if matches!(frame, Frame::Boxes(_)) {
                sack_dirty = true;
            }
            self.dispatch_frame(frame)?;
        }

        if sack_dirty && !self.inner.lock().terminating {
            let stream = match &self.inner.lock().attach {
                Attach::Attached(stream) => Some(stream.clone()),
                _ => None,
            };
            if let Some(stream) = stream {
                self.write_sack(stream.get_sack());
            }
        }
        Ok(())
    }

    fn attached_stream(&self) -> Result<Arc<Stream>> {
        match &self.inner.lock().attach {
            Attach::Attached(stream) => Ok(stream.clone()),
            _ => Err(MinervaError::StreamAttachFailure),
        }
    }

    fn dispatch_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::GimmeBoxes(succeeds) => {
                let stream = self.attached_stream()?;
                stream.subscribe_to_boxes(self.arc_self(), succeeds);
                Ok(())
            }
            Frame::Boxes(items) => {
                let stream = self.attached_stream()?;
                let items = items
                    .into_iter()
                    .map(|(seq, v)| {
                        let size = serde_json::to_vec(&v).map(|b| b.len()).unwrap_or(0);
                        (seq, v, size)
                    })
                    .collect();
                stream.boxes_received(items);
                Ok(())
            }
            Frame::Sack { ack, sack } => {
                let stream = self.attached_stream()?;
                match stream.sack_received(ack, &sack) {
                    Ok(()) => Ok(()),
                    Err(MinervaError::InvalidSack) => {
                        self.kill(Frame::TkAckedUnsentBoxes);
                        Err(MinervaError::InvalidSack)
                    }
                    Err(e) => Err(e),
                }
            }
            Frame::Reset { reason, application_level } => {
                let stream = self.attached_stream()?;
                stream.reset_from_client(&reason, application_level);
                Ok(())
            }
            Frame::YouCloseIt => {
                if self.inner.lock().mode != TransportMode::Http {
                    self.kill(Frame::TkInvalidFrameTypeOrArguments);
                    return Err(MinervaError::BadFrame(
                        "you_close_it is only valid from an HTTP client".into(),
                    ));
                }
                self.inner.lock().terminating = true;
                Ok(())
            }
            Frame::Hello(_) => unreachable!("hello is dispatched by frames_received before reaching here"),
            _ => {
                self.kill(Frame::TkInvalidFrameTypeOrArguments);
                Err(MinervaError::BadFrame("unexpected frame type from client".into()))
            }
        }
    }

    fn handle_hello(&self, value: Value) -> Result<()> {
        let over_http = self.inner.lock().mode == TransportMode::Http;
        let hello = match Hello::parse(&value, over_http) {
            Ok(h) => h,
            Err(e) => {
                self.kill(Frame::TkInvalidFrameTypeOrArguments);
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock();
            inner.got_hello = true;
            inner.max_receive_bytes = hello.max_receive_bytes;
        }

        // Hello's `m` (`maxOpenTime`) bounds this transport's attached
        // lifetime (spec §5); `m` is always required so this is infallible.
        let max_open_time = Duration::from_millis(
            hello.max_open_time_ms.expect("Hello::parse always populates max_open_time_ms"),
        );
        let open_timer = self.arc_self();
        tokio::spawn(async move {
            tokio::time::sleep(max_open_time).await;
            if !open_timer.is_terminating() {
                open_timer.write_you_close_it();
            }
        });

        let stream_result = if hello.request_new_stream {
            self.tracker.get_or_build_stream(hello.stream_id.clone())
        } else {
            self.tracker.get_stream(&hello.stream_id)
        };
        let stream = match stream_result {
            Ok(stream) => stream,
            Err(_) => {
                self.kill(Frame::TkStreamAttachFailure);
                return Err(MinervaError::StreamAttachFailure);
            }
        };

        self.inner.lock().attach = Attach::Authorizing { queued: Vec::new() };

        let auth_callback = self.auth_callback.clone();
        let credentials = hello.credentials_data.clone();
        let stream_id = hello.stream_id.clone();
        let this = self.arc_self();
        tokio::spawn(async move {
            let outcome = (auth_callback)(&stream_id, &credentials).await;
            this.finish_authorization(stream, outcome);
        });

        Ok(())
    }

    fn finish_authorization(&self, stream: Arc<Stream>, outcome: std::result::Result<(), AuthError>) {
        let queued = {
            let mut inner = self.inner.lock();
            if inner.terminating {
                return;
            }
            match outcome {
                Ok(()) => match std::mem::replace(&mut inner.attach, Attach::Attached(stream.clone())) {
                    Attach::Authorizing { queued } => queued,
                    other => {
                        inner.attach = other;
                        return;
                    }
                },
                Err(_) => {
                    inner.attach = Attach::AwaitingHello;
                    drop(inner);
                    self.kill(Frame::TkStreamAttachFailure);
                    return;
                }
            }
        };

        stream.transport_online(self.arc_self());
        let _ = self.dispatch_batch(queued);
    }
}

impl StreamTransport for Transport {
    fn transport_number(&self) -> u64 {
        self.transport_number
    }

    fn last_box_sent(&self) -> Option<u64> {
        self.inner.lock().last_box_sent
    }

    /// Writes a `SeqNum` anchor frame ahead of any batch that doesn't pick up
    /// exactly where this transport's last-written box left off (spec §5).
    fn write_boxes(&self, items: &[(u64, Value)]) {
        if self.inner.lock().terminating {
            return;
        }
        for (seq, value) in items {
            let needs_anchor = self.inner.lock().last_box_sent != Some(seq.wrapping_sub(1));
            if needs_anchor {
                self.enqueue_frame(&Frame::SeqNum(*seq));
            }
            self.enqueue_frame(&Frame::Box(value.clone()));
            self.inner.lock().last_box_sent = Some(*seq);
        }
    }

    fn write_sack(&self, sack: SackInfo) {
        self.enqueue_frame(&Frame::Sack { ack: sack.ack, sack: sack.sack });
    }

    fn write_reset(&self, reason: &str, application_level: bool) {
        self.enqueue_frame(&Frame::Reset { reason: reason.to_string(), application_level });
    }

    fn write_you_close_it(&self) {
        self.enqueue_frame(&Frame::YouCloseIt);
        self.inner.lock().terminating = true;
    }

    fn write_brb(&self, grace_ms: u64) {
        self.enqueue_frame(&Frame::TkBrb(grace_ms));
    }

    fn register_producer(&self, _streaming: bool) {}

    fn unregister_producer(&self) {}
}

impl Transport {
    /// The socket driver calls this when a write would block, propagating
    /// TCP backpressure up through the primary transport into the stream's
    /// application producer (§5's pause/resume chain). `run_socket` above
    /// writes eagerly and never calls this; a production driver using
    /// non-blocking writes directly would.
    pub fn on_write_blocked(&self) {
        if let Attach::Attached(stream) = &self.inner.lock().attach {
            stream.primary_paused();
        }
    }

    pub fn on_write_ready(&self) {
        if let Attach::Attached(stream) = &self.inner.lock().attach {
            stream.primary_resumed();
        }
    }
}

/// Drive one socket transport to completion: read, feed the decoder, drain
/// whatever it queued back out, repeat until EOF or the transport kills
/// itself.
pub async fn run_socket<S>(transport: Arc<Transport>, mut socket: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Err(e) = transport.receive_bytes(&buf[..n]) {
            tracing::debug!(error = %e, "transport terminating on protocol error");
        }
        while let Some(chunk) = transport.pop_outbound() {
            socket.write_all(&chunk).await?;
        }
        if transport.is_terminating() {
            break;
        }
    }
    let _ = socket.shutdown().await;
    Ok(())
}

/// Drive one HTTP-transport request: feed the already-collected body,
/// return the prelude-prefixed response body of whatever got queued.
pub fn run_http_request(transport: &Transport, body: &[u8]) -> Result<Bytes> {
    if let Err(e) = transport.receive_bytes(body) {
        tracing::debug!(error = %e, "http transport terminating on protocol error");
    }
    let mut response = Vec::from(crate::http::PRELUDE.as_bytes());
    while let Some(chunk) = transport.pop_outbound() {
        response.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(response))
}
