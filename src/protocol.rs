//! Hub wire envelopes.
//!
//! Outbound, every invocation is one JSON object:
//!
//! ```text
//! {"H": "<hub>", "M": "<method>", "A": [<args>], "I": <id>}
//! ```
//!
//! Inbound frames are JSON objects with optional keys:
//!
//! - `M` - hub messages, each `{"H": "<hub>", "M": "<method>", "A": [<args>]}`
//! - `E` - error payload for the invocation named by `I`
//! - `I` - invocation id (integer, or a numeric string as sent by servers)
//! - `R` - invocation result; a boolean acknowledgement or an opaque
//!   (usually compressed) payload
//!
//! Any other keys (`C`, `S`, `G`, ...) are kept in [`Envelope::extra`] so raw
//! hooks see the whole frame.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::correlation::{InvocationRecord, NO_INVOCATION};

/// Ordered argument list of a hub message or invocation.
pub type Arguments = Vec<Value>;

/// Outbound invocation envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundInvocation {
    /// Hub name.
    #[serde(rename = "H")]
    pub hub: String,
    /// Remote method name.
    #[serde(rename = "M")]
    pub method: String,
    /// Ordered arguments.
    #[serde(rename = "A")]
    pub args: Arguments,
    /// Invocation sequence number.
    #[serde(rename = "I")]
    pub id: i64,
}

impl OutboundInvocation {
    /// Serialize to the text frame written on the socket.
    ///
    /// # Errors
    ///
    /// Fails only if an argument value cannot be represented as JSON.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One server-pushed hub method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Hub that emitted the message, when the server names it.
    #[serde(rename = "H", default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
    /// Client-side event name.
    #[serde(rename = "M")]
    pub method: String,
    /// Ordered event arguments.
    #[serde(rename = "A", default)]
    pub arguments: Arguments,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Hub messages, in server order.
    #[serde(rename = "M", default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<HubMessage>,
    /// Error payload. `Some(Value::Null)` when the key is present but null.
    #[serde(
        rename = "E",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
    /// Raw invocation id.
    #[serde(rename = "I", default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<Value>,
    /// Result payload. `Some(Value::Null)` when the key is present but null.
    #[serde(
        rename = "R",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Every other key of the frame.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deserialize a key that was present, keeping an explicit `null`.
///
/// Plain `Option<Value>` maps `null` to `None`, which would make `"E": null`
/// indistinguishable from a frame without `E`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Integral value of a JSON number, accepting floats like `3.0`.
fn integral(n: &serde_json::Number) -> Option<i64> {
    /// 2^63, the first float above the `i64` range.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() != 0.0 || f < -LIMIT || f >= LIMIT {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, reason = "integral and within i64 range")]
    let value = f as i64;
    Some(value)
}

impl Envelope {
    /// Parse one text frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame is not a JSON object of the expected shape.
    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    /// Invocation sequence number named by `I`, or [`NO_INVOCATION`].
    ///
    /// Accepts integers, integral floats (`3.0`) and numeric strings.
    /// Anything else cannot be
    /// correlated and maps to the sentinel.
    #[must_use]
    pub fn invocation_index(&self) -> i64 {
        match &self.invocation_id {
            None => NO_INVOCATION,
            Some(Value::Number(n)) => integral(n).unwrap_or_else(|| {
                log::warn!("[Envelope] Non-integral invocation id {n}");
                NO_INVOCATION
            }),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                log::warn!("[Envelope] Non-numeric invocation id {s:?}");
                NO_INVOCATION
            }),
            Some(other) => {
                log::warn!("[Envelope] Unsupported invocation id {other}");
                NO_INVOCATION
            }
        }
    }

    /// The `R` payload when it is opaque text rather than a boolean ack.
    #[must_use]
    pub fn compressed_result(&self) -> Option<&str> {
        self.result.as_ref().and_then(Value::as_str)
    }
}

/// Error reported through the client's error hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationError {
    /// The server's `E` payload.
    pub error: Value,
    /// The matching invocation, if the id was known.
    pub call_arguments: Option<InvocationRecord>,
}
