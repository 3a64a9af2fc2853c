//! Byte-stream framing: the UNKNOWN-mode sentinel sniff and the two
//! length-prefixed payload decoders built on top of whichever mode wins.
//!
//! This module never looks inside a frame payload — it only knows how to
//! carve complete payloads out of an accumulating byte buffer. Turning a
//! payload into a [`crate::frame::Frame`] is `frame.rs`'s job.

use bytes::{Buf, BytesMut};

use crate::error::{MinervaError, Result};

/// A transport's wire mode, selected once per connection and fixed for its
/// lifetime thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Unknown,
    PolicyFile,
    LengthPrefixA,
    LengthPrefixB,
    Http,
}

const POLICY_SENTINEL: &[u8] = b"<policy-file-request/>\0";
const BENCODE_SENTINEL: &[u8] = b"<bencode/>\n";
const INT32_SENTINEL: &[u8] = b"<int32/>\n";

/// Bytes buffered in UNKNOWN mode before giving up and hard-closing.
const SNIFF_LIMIT: usize = 512;

/// Result of sniffing an UNKNOWN-mode transport's buffered prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSniff {
    /// A sentinel matched; `consumed` bytes of the sentinel itself should be
    /// dropped from the buffer before continuing in `mode`.
    Matched { mode: TransportMode, consumed: usize },
    /// No sentinel has matched yet, but the buffer is still short enough to
    /// keep waiting.
    NeedMoreBytes,
    /// `SNIFF_LIMIT` bytes accumulated without a match; hard-close.
    Reject,
}

/// Inspect an UNKNOWN-mode transport's buffered prefix for one of the three
/// recognized sentinels.
pub fn sniff_mode(buf: &[u8]) -> ModeSniff {
    if buf.starts_with(POLICY_SENTINEL) {
        return ModeSniff::Matched { mode: TransportMode::PolicyFile, consumed: POLICY_SENTINEL.len() };
    }
    if buf.starts_with(BENCODE_SENTINEL) {
        return ModeSniff::Matched { mode: TransportMode::LengthPrefixB, consumed: BENCODE_SENTINEL.len() };
    }
    if buf.starts_with(INT32_SENTINEL) {
        return ModeSniff::Matched { mode: TransportMode::LengthPrefixA, consumed: INT32_SENTINEL.len() };
    }
    if buf.len() >= SNIFF_LIMIT {
        return ModeSniff::Reject;
    }
    ModeSniff::NeedMoreBytes
}

/// 1 MiB — the default, configurable soft limit on a single frame's length.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// 1 GiB — the hard, non-configurable ceiling on a single frame's length.
pub const HARD_MAX_LENGTH: u64 = 1024 * 1024 * 1024;

fn ensure_within_max_length(len: u64, max_frame_length: usize) -> Result<()> {
    if len > HARD_MAX_LENGTH {
        return Err(MinervaError::FrameCorruption(format!(
            "frame length {len} exceeds the hard maximum of {HARD_MAX_LENGTH}"
        )));
    }
    if len > max_frame_length as u64 {
        return Err(MinervaError::FrameCorruption(format!(
            "frame length {len} exceeds the configured maximum of {max_frame_length}"
        )));
    }
    Ok(())
}

/// Which of the two length-prefixed outer framings a decoder speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthFraming {
    /// Length-prefix-A, netstring-like: `len ":" payload ","`.
    TrailerComma,
    /// Length-prefix-B, bencode-like: `len ":" payload`, no trailer.
    NoTrailer,
}

/// A single digit run this long (2^64 has 20 decimal digits) without a `:`
/// can never be a valid length prefix; bail out rather than buffer forever.
const MAX_LENGTH_DIGITS: usize = 20;

/// Accumulates bytes for one transport and yields complete frame payloads.
pub struct FrameDecoder {
    framing: LengthFraming,
    max_frame_length: usize,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new(framing: LengthFraming, max_frame_length: usize) -> Self {
        Self { framing, max_frame_length, buf: BytesMut::new() }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop one complete frame payload from the buffer, if one is fully
    /// buffered. Call repeatedly after each `push` until it returns `Ok(None)`.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        let colon = match self.buf.iter().position(|&b| b == b':') {
            Some(i) => i,
            None => {
                if self.buf.len() > MAX_LENGTH_DIGITS {
                    return Err(MinervaError::FrameCorruption("length prefix too long".into()));
                }
                return Ok(None);
            }
        };
        if colon == 0 {
            return Err(MinervaError::FrameCorruption("empty length prefix".into()));
        }
        let digits = &self.buf[..colon];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(MinervaError::FrameCorruption("non-digit length prefix".into()));
        }
        let len: u64 = std::str::from_utf8(digits)
            .expect("already validated ASCII digits")
            .parse()
            .map_err(|_| MinervaError::FrameCorruption("length prefix overflow".into()))?;
        ensure_within_max_length(len, self.max_frame_length)?;
        let len = len as usize;

        let trailer_len = match self.framing {
            LengthFraming::TrailerComma => 1,
            LengthFraming::NoTrailer => 0,
        };
        let total = colon + 1 + len + trailer_len;
        if self.buf.len() < total {
            return Ok(None);
        }
        if self.framing == LengthFraming::TrailerComma && self.buf[total - 1] != b',' {
            return Err(MinervaError::FrameCorruption("missing trailing comma".into()));
        }

        let payload = self.buf[colon + 1..colon + 1 + len].to_vec();
        self.buf.advance(total);
        Ok(Some(payload))
    }
}
