use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::MAX_PAYLOAD_BYTES;

/// One event as pushed by the stream job. Field order follows the payload.
pub type EventRecord = Map<String, Value>;

/// Outcome of the pre-decode size/emptiness check.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BatchClass {
    /// Zero length body, the connectivity check sent before real traffic.
    Empty,
    TooLarge,
    Proceed,
}

/// Classify a raw body without looking at its content.
pub fn classify(body: &[u8]) -> BatchClass {
    match body.len() {
        0 => BatchClass::Empty,
        n if n > MAX_PAYLOAD_BYTES => BatchClass::TooLarge,
        _ => BatchClass::Proceed,
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON - {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a JSON array or object at top level, found {found}")]
    UnsupportedShape { found: &'static str },
}

/// Ordered records of one request. Elements that are not JSON objects, and a
/// bare top level scalar, are kept as they are so the caller can report them
/// per record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventBatch {
    pub items: Vec<Value>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn decode(body: &[u8]) -> Result<EventBatch, DecodeError> {
    let raw_value: Value = serde_json::from_slice(body)?;
    let items = match raw_value {
        Value::Array(items) => {
            debug!("array payload with {} items", items.len());
            items
        }
        Value::Object(record) => {
            debug!("single object payload");
            vec![Value::Object(record)]
        }
        Value::Null => return Err(DecodeError::UnsupportedShape { found: "null" }),
        // a bare scalar still goes through key extraction, where it fails as a record
        other => {
            debug!("scalar payload of type {}", kind_of(&other));
            vec![other]
        }
    };

    Ok(EventBatch { items })
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
