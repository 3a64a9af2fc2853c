//! The Minerva wire frame taxonomy and its JSON-array encoding.
//!
//! Every frame is a JSON array `[code, ...args]`. `code` identifies the
//! frame type (see the table in spec §4.1); the argument count for a given
//! type is fixed, and decoding an array whose length doesn't match that
//! type's arity is a [`MinervaError::BadFrame`].
//!
//! This module only knows how to go from bytes-that-are-already-one-JSON-
//! value to a [`Frame`] and back. Splitting a byte stream into individual
//! frame payloads is [`crate::framing`]'s job.

use serde_json::{Map, Value};

use crate::error::{MinervaError, Result};

/// Numeric frame type codes, exactly as specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    Boxes = 0,
    Box = 1,
    SeqNum = 2,
    Sack = 4,
    Hello = 5,
    GimmeBoxes = 6,
    Reset = 10,
    YouCloseIt = 11,
    Padding = 20,
    TkStreamAttachFailure = 601,
    TkAckedUnsentBoxes = 602,
    TkInvalidFrameTypeOrArguments = 603,
    TkFrameCorruption = 610,
    TkIntraframeCorruption = 611,
    TkBrb = 650,
}

impl FrameType {
    fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => FrameType::Boxes,
            1 => FrameType::Box,
            2 => FrameType::SeqNum,
            4 => FrameType::Sack,
            5 => FrameType::Hello,
            6 => FrameType::GimmeBoxes,
            10 => FrameType::Reset,
            11 => FrameType::YouCloseIt,
            20 => FrameType::Padding,
            601 => FrameType::TkStreamAttachFailure,
            602 => FrameType::TkAckedUnsentBoxes,
            603 => FrameType::TkInvalidFrameTypeOrArguments,
            610 => FrameType::TkFrameCorruption,
            611 => FrameType::TkIntraframeCorruption,
            650 => FrameType::TkBrb,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Exact number of arguments (i.e. array length minus the code itself).
    fn arity(self) -> usize {
        match self {
            FrameType::Boxes => 1,
            FrameType::Box => 1,
            FrameType::SeqNum => 1,
            FrameType::Sack => 2,
            FrameType::Hello => 1,
            FrameType::GimmeBoxes => 1,
            FrameType::Reset => 2,
            FrameType::YouCloseIt => 0,
            FrameType::Padding => 1,
            FrameType::TkStreamAttachFailure => 0,
            FrameType::TkAckedUnsentBoxes => 0,
            FrameType::TkInvalidFrameTypeOrArguments => 0,
            FrameType::TkFrameCorruption => 0,
            FrameType::TkIntraframeCorruption => 0,
            FrameType::TkBrb => 1,
        }
    }
}

/// A decoded Minerva frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `[0, {"<seq>": box, ...}]` — client→server.
    Boxes(Vec<(u64, Value)>),
    /// `[1, box]` — server→client.
    Box(Value),
    /// `[2, seq]` — server→client sequence anchor.
    SeqNum(u64),
    /// `[4, ackNumber, sackList]` — both directions. `ack = None` is the
    /// wire `-1` sentinel ("nothing contiguously delivered yet").
    Sack { ack: Option<u64>, sack: Vec<u64> },
    /// `[5, helloDict]` — client→server.
    Hello(Value),
    /// `[6, succeedsTransport]` — client→server.
    GimmeBoxes(Option<u64>),
    /// `[10, reasonString, applicationLevel]` — both directions.
    Reset { reason: String, application_level: bool },
    /// `[11]` — server→client.
    YouCloseIt,
    /// `[20, length]` — server→client.
    Padding(u64),
    TkStreamAttachFailure,
    TkAckedUnsentBoxes,
    TkInvalidFrameTypeOrArguments,
    TkFrameCorruption,
    TkIntraframeCorruption,
    /// `[650, graceMs]` — server→client "be right back".
    TkBrb(u64),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Boxes(_) => FrameType::Boxes,
            Frame::Box(_) => FrameType::Box,
            Frame::SeqNum(_) => FrameType::SeqNum,
            Frame::Sack { .. } => FrameType::Sack,
            Frame::Hello(_) => FrameType::Hello,
            Frame::GimmeBoxes(_) => FrameType::GimmeBoxes,
            Frame::Reset { .. } => FrameType::Reset,
            Frame::YouCloseIt => FrameType::YouCloseIt,
            Frame::Padding(_) => FrameType::Padding,
            Frame::TkStreamAttachFailure => FrameType::TkStreamAttachFailure,
            Frame::TkAckedUnsentBoxes => FrameType::TkAckedUnsentBoxes,
            Frame::TkInvalidFrameTypeOrArguments => FrameType::TkInvalidFrameTypeOrArguments,
            Frame::TkFrameCorruption => FrameType::TkFrameCorruption,
            Frame::TkIntraframeCorruption => FrameType::TkIntraframeCorruption,
            Frame::TkBrb(_) => FrameType::TkBrb,
        }
    }

    /// Encode this frame to its JSON-array `Value` representation.
    pub fn to_value(&self) -> Value {
        let code = Value::from(self.frame_type().code());
        let mut arr = vec![code];
        match self {
            Frame::Boxes(items) => {
                let mut map = Map::with_capacity(items.len());
                for (seq, msg) in items {
                    map.insert(seq.to_string(), msg.clone());
                }
                arr.push(Value::Object(map));
            }
            Frame::Box(v) => arr.push(v.clone()),
            Frame::SeqNum(seq) => arr.push(Value::from(*seq)),
            Frame::Sack { ack, sack } => {
                arr.push(match ack {
                    Some(n) => Value::from(*n),
                    None => Value::from(-1),
                });
                arr.push(Value::from(sack.clone()));
            }
            Frame::Hello(v) => arr.push(v.clone()),
            Frame::GimmeBoxes(succeeds) => {
                arr.push(match succeeds {
                    Some(n) => Value::from(*n),
                    None => Value::Null,
                });
            }
            Frame::Reset { reason, application_level } => {
                arr.push(Value::from(reason.clone()));
                arr.push(Value::from(*application_level));
            }
            Frame::YouCloseIt => {}
            Frame::Padding(len) => arr.push(Value::from(*len)),
            Frame::TkStreamAttachFailure
            | Frame::TkAckedUnsentBoxes
            | Frame::TkInvalidFrameTypeOrArguments
            | Frame::TkFrameCorruption
            | Frame::TkIntraframeCorruption => {}
            Frame::TkBrb(grace_ms) => arr.push(Value::from(*grace_ms)),
        }
        Value::Array(arr)
    }

    /// Serialize directly to bytes (the payload a [`crate::framing`] encoder wraps).
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_value())
            .map_err(|e| MinervaError::BadFrame(format!("non-finite value in frame: {e}")))
    }

    /// Decode a frame from an already-JSON-parsed array value.
    pub fn from_value(value: &Value) -> Result<Self> {
        let arr = value
            .as_array()
            .ok_or_else(|| MinervaError::BadFrame("frame is not a JSON array".into()))?;
        let code = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| MinervaError::BadFrame("frame has no numeric type code".into()))?;
        let frame_type = FrameType::from_code(code)
            .ok_or_else(|| MinervaError::BadFrame(format!("unknown frame type code {code}")))?;

        let args = &arr[1..];
        if args.len() != frame_type.arity() {
            return Err(MinervaError::BadFrame(format!(
                "frame type {code} expects {} argument(s), got {}",
                frame_type.arity(),
                args.len()
            )));
        }

        Ok(match frame_type {
            FrameType::Boxes => {
                let obj = args[0]
                    .as_object()
                    .ok_or_else(|| MinervaError::BadFrame("boxes argument is not an object".into()))?;
                let mut items = Vec::with_capacity(obj.len());
                for (k, v) in obj {
                    let seq: u64 = k
                        .parse()
                        .map_err(|_| MinervaError::BadFrame(format!("invalid box sequence key {k:?}")))?;
                    items.push((seq, v.clone()));
                }
                items.sort_by_key(|(seq, _)| *seq);
                Frame::Boxes(items)
            }
            FrameType::Box => Frame::Box(args[0].clone()),
            FrameType::SeqNum => Frame::SeqNum(
                args[0]
                    .as_u64()
                    .ok_or_else(|| MinervaError::BadFrame("seqnum argument is not a non-negative integer".into()))?,
            ),
            FrameType::Sack => {
                let ack_raw = args[0]
                    .as_i64()
                    .ok_or_else(|| MinervaError::BadFrame("sack ackNumber is not an integer".into()))?;
                let ack = if ack_raw < 0 {
                    if ack_raw != -1 {
                        return Err(MinervaError::BadFrame("sack ackNumber must be -1 or non-negative".into()));
                    }
                    None
                } else {
                    Some(ack_raw as u64)
                };
                let sack_arr = args[1]
                    .as_array()
                    .ok_or_else(|| MinervaError::BadFrame("sackList is not an array".into()))?;
                let mut sack = Vec::with_capacity(sack_arr.len());
                for v in sack_arr {
                    sack.push(
                        v.as_u64()
                            .ok_or_else(|| MinervaError::BadFrame("sackList entry is not a non-negative integer".into()))?,
                    );
                }
                Frame::Sack { ack, sack }
            }
            FrameType::Hello => Frame::Hello(args[0].clone()),
            FrameType::GimmeBoxes => {
                let succeeds = match &args[0] {
                    Value::Null => None,
                    v => Some(
                        v.as_u64()
                            .ok_or_else(|| MinervaError::BadFrame("succeedsTransport is not a non-negative integer or null".into()))?,
                    ),
                };
                Frame::GimmeBoxes(succeeds)
            }
            FrameType::Reset => {
                let reason = args[0]
                    .as_str()
                    .ok_or_else(|| MinervaError::BadFrame("reset reason is not a string".into()))?
                    .to_string();
                let application_level = args[1]
                    .as_bool()
                    .ok_or_else(|| MinervaError::BadFrame("reset applicationLevel is not a boolean".into()))?;
                Frame::Reset { reason, application_level }
            }
            FrameType::YouCloseIt => Frame::YouCloseIt,
            FrameType::Padding => Frame::Padding(
                args[0]
                    .as_u64()
                    .ok_or_else(|| MinervaError::BadFrame("padding length is not a non-negative integer".into()))?,
            ),
            FrameType::TkStreamAttachFailure => Frame::TkStreamAttachFailure,
            FrameType::TkAckedUnsentBoxes => Frame::TkAckedUnsentBoxes,
            FrameType::TkInvalidFrameTypeOrArguments => Frame::TkInvalidFrameTypeOrArguments,
            FrameType::TkFrameCorruption => Frame::TkFrameCorruption,
            FrameType::TkIntraframeCorruption => Frame::TkIntraframeCorruption,
            FrameType::TkBrb => Frame::TkBrb(
                args[0]
                    .as_u64()
                    .ok_or_else(|| MinervaError::BadFrame("tk_brb grace is not a non-negative integer".into()))?,
            ),
        })
    }

    /// Parse one complete frame payload (the bytes between the length-prefix
    /// framing's delimiters). A successful length-prefix parse whose payload
    /// is not exhaustively consumable JSON is an
    /// [`MinervaError::IntraframeCorruption`], per spec §4.1.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut de = serde_json::Deserializer::from_slice(payload);
        let value: Value = serde::de::Deserialize::deserialize(&mut de)
            .map_err(|_| MinervaError::IntraframeCorruption)?;
        de.end().map_err(|_| MinervaError::IntraframeCorruption)?;
        Frame::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn box_roundtrip() {
        let frame = Frame::Box(json!({"hello": "world"}));
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn boxes_roundtrip_sorted_by_seq() {
        let frame = Frame::Boxes(vec![(5, json!("c")), (3, json!("a")), (4, json!("b"))]);
        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded).unwrap();
        match decoded {
            Frame::Boxes(items) => {
                assert_eq!(items, vec![(3, json!("a")), (4, json!("b")), (5, json!("c"))]);
            }
            _ => panic!("expected Boxes"),
        }
    }

    #[test]
    fn sack_none_ack_roundtrips_as_minus_one() {
        let frame = Frame::Sack { ack: None, sack: vec![2, 5] };
        let value = frame.to_value();
        assert_eq!(value[1], json!(-1));
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn gimme_boxes_with_null_succeeds() {
        let frame = Frame::GimmeBoxes(None);
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn you_close_it_has_no_args() {
        let encoded = Frame::YouCloseIt.encode().unwrap();
        assert_eq!(encoded, b"[11]");
    }

    #[test]
    fn wrong_arity_is_bad_frame() {
        let bad = json!([10, "only one arg"]);
        let err = Frame::from_value(&bad).unwrap_err();
        assert!(matches!(err, MinervaError::BadFrame(_)));
    }

    #[test]
    fn unknown_code_is_bad_frame() {
        let bad = json!([9999]);
        let err = Frame::from_value(&bad).unwrap_err();
        assert!(matches!(err, MinervaError::BadFrame(_)));
    }

    #[test]
    fn non_array_is_bad_frame() {
        let bad = json!({"not": "an array"});
        let err = Frame::from_value(&bad).unwrap_err();
        assert!(matches!(err, MinervaError::BadFrame(_)));
    }

    #[test]
    fn trailing_garbage_is_intraframe_corruption() {
        let payload = b"[11] trailing garbage";
        let err = Frame::decode(payload).unwrap_err();
        assert!(matches!(err, MinervaError::IntraframeCorruption));
    }

    #[test]
    fn reset_frame_roundtrip() {
        let frame = Frame::Reset { reason: "resources exhausted".into(), application_level: false };
        let encoded = frame.encode().unwrap();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn sack_ack_must_be_minus_one_or_non_negative() {
        let bad = json!([4, -5, []]);
        let err = Frame::from_value(&bad).unwrap_err();
        assert!(matches!(err, MinervaError::BadFrame(_)));
    }
}
