//! Wire-format message and the line codec.
//!
//! Every frame on the wire is a single JSON object terminated by `\n`:
//!
//! ```text
//! {"id":"1","method":"echo","data":{"Text":"hi"}}
//! {"id":"1","method":"","data":{"Text":"hi"},"error":""}
//! ```
//!
//! Requests, responses and server pushes share the same shape. A response
//! echoes the request `id` and never carries a `method`; a push uses the
//! reserved id [`PUSH_ID`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::ProtocolError;

/// Correlation id reserved for server-initiated messages.
pub const PUSH_ID: &str = "0";

/// Method name of the keepalive probe. Clients ignore it.
pub const KEEPALIVE_METHOD: &str = "_echo";

/// Outcome of a handler invocation: payload (if any) or error text.
pub type Reply = Result<Option<Value>, String>;

/// A request, response or push.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id chosen by the sender (`"0"` for pushes).
    #[serde(default)]
    pub id: String,
    /// Route name. Empty on responses.
    #[serde(default)]
    pub method: String,
    /// Payload, meaningful only to the paired handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure text. Empty on success.
    #[serde(default)]
    pub error: String,
}

impl Message {
    /// Build a client request.
    pub fn request(id: impl Into<String>, method: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            data,
            error: String::new(),
        }
    }

    /// Build the response to request `id` from a handler outcome.
    pub fn reply(id: impl Into<String>, reply: Reply) -> Self {
        match reply {
            Ok(data) => Self {
                id: id.into(),
                method: String::new(),
                data,
                error: String::new(),
            },
            Err(error) => Self {
                id: id.into(),
                method: String::new(),
                data: None,
                error,
            },
        }
    }

    /// Build a server-initiated message.
    pub fn push(method: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: PUSH_ID.to_owned(),
            method: method.into(),
            data,
            error: String::new(),
        }
    }

    /// Whether this message was initiated by the server.
    pub fn is_push(&self) -> bool {
        self.id == PUSH_ID
    }

    /// Whether this is a keepalive probe.
    pub fn is_keepalive(&self) -> bool {
        self.is_push() && self.method == KEEPALIVE_METHOD
    }
}

/// Serialize a message to one newline-terminated line.
pub fn encode(message: &Message) -> String {
    let mut line = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(id = %message.id, method = %message.method, error = %e, "failed to encode message, dropping payload");
            let stripped = Message {
                data: Some(empty_object()),
                ..message.clone()
            };
            serde_json::to_string(&stripped).unwrap_or_default()
        }
    };
    line.push('\n');
    line
}

/// Convert a handler or push payload into wire data.
///
/// A payload that fails to serialize is replaced by `{}`; the failure is
/// logged and never reaches the caller. `null` means "no data".
pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to serialize payload, sending empty object");
            Some(empty_object())
        }
    }
}

/// Parse one line into a message.
pub fn decode(line: &str) -> Result<Message, ProtocolError> {
    decode_bytes(line.as_bytes())
}

/// Parse one raw line into a message.
///
/// Bytes that are not valid UTF-8 are reported as malformed JSON, like any
/// other unparsable line.
pub fn decode_bytes(line: &[u8]) -> Result<Message, ProtocolError> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_slice(line)?)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
