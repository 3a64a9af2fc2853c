//! Parsing and validation of the Hello handshake payload.

use serde_json::Value;

use crate::error::MinervaError;
use crate::stream::StreamId;

/// HTTP response format requested by a Hello's `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFormat {
    Xhr,
    HtmlFile,
}

impl HttpFormat {
    fn from_i64(v: i64) -> Option<Self> {
        match v {
            2 => Some(HttpFormat::Xhr),
            3 => Some(HttpFormat::HtmlFile),
            _ => None,
        }
    }
}

/// A validated Hello handshake.
#[derive(Debug, Clone)]
pub struct Hello {
    pub protocol_version: u8,
    pub stream_id: StreamId,
    pub transport_number: u64,
    pub request_new_stream: bool,
    pub credentials_data: Value,
    pub max_receive_bytes: Option<u64>,
    pub max_open_time_ms: Option<u64>,
    pub http_format: Option<HttpFormat>,
    pub need_padding_bytes: Option<u64>,
    pub succeeds_transport: Option<u64>,
    pub streaming_response: Option<bool>,
}

const NEED_PADDING_BYTES_MAX: u64 = 16 * 1024;

fn field<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key)
}

fn require_u64(obj: &serde_json::Map<String, Value>, key: &'static str) -> Result<u64, MinervaError> {
    let v = field(obj, key)
        .ok_or_else(|| MinervaError::InvalidHello(format!("missing required field {key:?}")))?;
    v.as_u64()
        .ok_or_else(|| MinervaError::InvalidHello(format!("field {key:?} is not a non-negative integer")))
}

fn optional_u64(obj: &serde_json::Map<String, Value>, key: &'static str) -> Result<Option<u64>, MinervaError> {
    match field(obj, key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| MinervaError::InvalidHello(format!("field {key:?} is not a non-negative integer"))),
    }
}

fn optional_bool(obj: &serde_json::Map<String, Value>, key: &'static str, default: bool) -> Result<bool, MinervaError> {
    match field(obj, key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(MinervaError::InvalidHello(format!("field {key:?} must be a boolean"))),
    }
}

impl Hello {
    /// True if `http_format` (and therefore `needPaddingBytes`, and the
    /// requirement that `maxReceiveBytes` be present) applies to this Hello.
    pub fn is_http(&self) -> bool {
        self.http_format.is_some()
    }

    /// Validate and parse a Hello payload.
    ///
    /// `over_http` tells the parser whether the HTTP-only fields (`t`, `p`,
    /// and the requirement that `r` be present) should be enforced — a
    /// socket transport never supplies them.
    pub fn parse(value: &Value, over_http: bool) -> Result<Self, MinervaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| MinervaError::InvalidHello("hello payload is not an object".into()))?;

        let protocol_version = require_u64(obj, "v")?;
        if protocol_version != 2 {
            return Err(MinervaError::InvalidHello(format!(
                "unsupported protocol version {protocol_version}"
            )));
        }

        let stream_id_str = field(obj, "i")
            .and_then(Value::as_str)
            .ok_or_else(|| MinervaError::InvalidHello("missing or non-string field \"i\"".into()))?;
        let stream_id = StreamId::new(stream_id_str.as_bytes().to_vec())?;

        let transport_number = require_u64(obj, "n")?;
        let request_new_stream = optional_bool(obj, "w", false)?;

        let credentials_data = match field(obj, "c") {
            None => Value::Object(serde_json::Map::new()),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => return Err(MinervaError::InvalidHello("field \"c\" must be an object".into())),
        };

        let max_open_time_ms = Some(require_u64(obj, "m")?);

        let http_format = match field(obj, "t") {
            None => None,
            Some(v) => {
                let raw = v
                    .as_i64()
                    .ok_or_else(|| MinervaError::InvalidHello("field \"t\" is not an integer".into()))?;
                Some(HttpFormat::from_i64(raw).ok_or_else(|| {
                    MinervaError::InvalidHello(format!("unrecognized http format {raw}"))
                })?)
            }
        };

        if over_http && http_format.is_none() {
            return Err(MinervaError::InvalidHello("field \"t\" is required over HTTP".into()));
        }
        if !over_http && http_format.is_some() {
            return Err(MinervaError::InvalidHello("field \"t\" is only valid over HTTP".into()));
        }

        let max_receive_bytes = optional_u64(obj, "r")?;
        if over_http && max_receive_bytes.is_none() {
            return Err(MinervaError::InvalidHello("field \"r\" is required over HTTP".into()));
        }

        let need_padding_bytes = optional_u64(obj, "p")?;
        if let Some(p) = need_padding_bytes {
            if !over_http {
                return Err(MinervaError::InvalidHello("field \"p\" is only valid over HTTP".into()));
            }
            if p > NEED_PADDING_BYTES_MAX {
                return Err(MinervaError::InvalidHello(format!(
                    "needPaddingBytes {p} exceeds {NEED_PADDING_BYTES_MAX}"
                )));
            }
        }

        let succeeds_transport = optional_u64(obj, "g")?;

        let streaming_response = match field(obj, "s") {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => return Err(MinervaError::InvalidHello("field \"s\" must be a boolean".into())),
        };

        Ok(Hello {
            protocol_version: 2,
            stream_id,
            transport_number,
            request_new_stream,
            credentials_data,
            max_receive_bytes,
            max_open_time_ms,
            http_format,
            need_padding_bytes,
            succeeds_transport,
            streaming_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_socket_hello() -> Value {
        json!({
            "v": 2,
            "i": "a".repeat(20),
            "n": 0,
            "m": 1_073_741_824u64,
        })
    }

    #[test]
    fn accepts_minimum_http_hello() {
        let hello = json!({
            "v": 2,
            "i": "A".repeat(20),
            "n": 0,
            "r": 1_073_741_824u64,
            "m": 1_073_741_824u64,
            "w": true,
            "t": 2,
            "s": true,
        });
        let parsed = Hello::parse(&hello, true).unwrap();
        assert_eq!(parsed.stream_id.as_bytes().len(), 20);
        assert!(parsed.request_new_stream);
        assert_eq!(parsed.streaming_response, Some(true));
    }

    #[test]
    fn accepts_minimum_socket_hello() {
        let hello = minimal_socket_hello();
        let parsed = Hello::parse(&hello, false).unwrap();
        assert_eq!(parsed.transport_number, 0);
        assert!(parsed.http_format.is_none());
    }

    #[test]
    fn wrong_protocol_version_is_rejected() {
        let mut hello = minimal_socket_hello();
        hello["v"] = json!(1);
        assert!(matches!(Hello::parse(&hello, false), Err(MinervaError::InvalidHello(_))));
    }

    #[test]
    fn stream_id_length_boundaries() {
        for (len, ok) in [(19, false), (20, true), (30, true), (31, false)] {
            let mut hello = minimal_socket_hello();
            hello["i"] = json!("x".repeat(len));
            let result = Hello::parse(&hello, false);
            assert_eq!(result.is_ok(), ok, "length {len}");
        }
    }

    #[test]
    fn http_requires_max_receive_bytes_and_format() {
        let hello = minimal_socket_hello();
        assert!(Hello::parse(&hello, true).is_err());
    }

    #[test]
    fn need_padding_bytes_over_limit_rejected() {
        let mut hello = minimal_socket_hello();
        hello["t"] = json!(2);
        hello["r"] = json!(1024);
        hello["p"] = json!(16 * 1024 + 1);
        assert!(Hello::parse(&hello, true).is_err());
    }

    #[test]
    fn credentials_data_defaults_to_empty_object() {
        let hello = minimal_socket_hello();
        let parsed = Hello::parse(&hello, false).unwrap();
        assert_eq!(parsed.credentials_data, json!({}));
    }
}
