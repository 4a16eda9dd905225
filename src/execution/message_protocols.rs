//! Wire format for the editor host.
//!
//! A request is one JSON object `{"type": <operation>, "params": {...}}`,
//! optionally newline terminated. A response is one JSON object; it is
//! complete as soon as the accumulated bytes parse as a full JSON value.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::command::Command;
use crate::config::Framing;
use crate::constants::messages;

/// Request envelope as written to the socket
#[derive(Serialize, Debug, Clone)]
pub struct RequestEnvelope<'a> {
    #[serde(rename = "type")]
    pub operation: &'a str,
    pub params: &'a Map<String, Value>,
}

impl<'a> RequestEnvelope<'a> {
    pub fn for_command(command: &'a Command) -> Self {
        Self {
            operation: &command.operation,
            params: &command.params,
        }
    }

    /// Serialize the envelope with the configured framing
    pub fn encode(&self, framing: Framing) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes =
            serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if framing == Framing::Newline {
            bytes.push(b'\n');
        }
        Ok(bytes)
    }
}

/// Reply bytes that cannot be interpreted as a host response
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("response exceeded {limit} bytes")]
    TooLarge { limit: usize },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("truncated response: connection closed mid-message")]
    Truncated,

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("response carries no success indicator")]
    NoSuccessIndicator,
}

/// A well-formed host reply, classified
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Success(Value),
    Failure(String),
}

/// Try to decode one complete JSON value from the bytes read so far.
///
/// `Ok(None)` means more bytes are needed. Bytes following the first complete
/// value (such as a trailing newline) are ignored.
pub fn decode_response(buf: &[u8], max_bytes: usize) -> Result<Option<Value>, ProtocolError> {
    if buf.len() > max_bytes {
        return Err(ProtocolError::TooLarge { limit: max_bytes });
    }

    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(ProtocolError::Malformed(e.to_string())),
    }
}

/// Classify a decoded response as success or application failure
pub fn interpret_response(value: Value) -> Result<RemoteReply, ProtocolError> {
    let Value::Object(mut object) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let status = object.get("status").and_then(Value::as_str);
    let succeeded = if status == Some("error") {
        false
    } else if let Some(flag) = object.get("success").and_then(Value::as_bool) {
        flag
    } else if matches!(status, Some("success") | Some("ok")) {
        true
    } else {
        return Err(ProtocolError::NoSuccessIndicator);
    };

    if succeeded {
        let payload = match object.remove("result") {
            Some(result) => result,
            None => Value::Object(object),
        };
        Ok(RemoteReply::Success(payload))
    } else {
        Ok(RemoteReply::Failure(extract_error_message(&object)))
    }
}

fn extract_error_message(object: &Map<String, Value>) -> String {
    match object.get("error") {
        Some(Value::String(text)) => return text.clone(),
        Some(Value::Object(nested)) => {
            for key in ["errorMessage", "errorDetails", "message"] {
                if let Some(text) = nested.get(key).and_then(Value::as_str) {
                    return text.to_string();
                }
            }
        }
        _ => {}
    }

    object
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| messages::UNKNOWN_REMOTE_ERROR.to_string())
}
