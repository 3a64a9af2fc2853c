//! Flash/Silverlight cross-domain policy-file responses.

use bytes::Bytes;

/// Configured policy text, validated once at construction so later encoding
/// can never fail.
#[derive(Debug, Clone)]
pub struct PolicyResponder {
    bytes: Bytes,
}

#[derive(Debug, thiserror::Error)]
#[error("policy text must not contain a NUL byte")]
pub struct PolicyContainsNul;

impl PolicyResponder {
    pub fn new(policy_text: impl Into<Bytes>) -> Result<Self, PolicyContainsNul> {
        let bytes = policy_text.into();
        if bytes.contains(&0) {
            return Err(PolicyContainsNul);
        }
        Ok(Self { bytes })
    }

    /// The policy text followed by a single trailing NUL, as spec'd.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.bytes.len() + 1);
        out.extend_from_slice(&self.bytes);
        out.push(0);
        Bytes::from(out)
    }
}
