use serde_json::Value;
use thiserror::Error;

use crate::events::{kind_of, EventRecord};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("record is a JSON {kind}, not an object")]
    NotARecord { kind: &'static str },
    #[error("key field {field} is missing")]
    Missing { field: String },
    #[error("key field {field} holds a JSON {kind}, which is not usable as a key")]
    NotRepresentable { field: String, kind: &'static str },
}

/// Read the store key out of one record.
///
/// Strings are used as they are, empty ones included. Numbers and booleans use
/// their JSON text. Field lookup is case sensitive.
pub fn extract_key(record: &Value, field: &str) -> Result<String, KeyError> {
    let object: &EventRecord = record.as_object().ok_or(KeyError::NotARecord {
        kind: kind_of(record),
    })?;

    match object.get(field) {
        None => Err(KeyError::Missing {
            field: field.to_string(),
        }),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
        Some(other) => Err(KeyError::NotRepresentable {
            field: field.to_string(),
            kind: kind_of(other),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    const FIELD: &str = "EventProcessedUtcTime";

    #[test]
    fn test_extract_string_key() {
        let record = json!({"EventProcessedUtcTime": "2024-03-01T10:00:00.0000000Z", "x": 1});
        assert_eq!(
            extract_key(&record, FIELD).unwrap(),
            "2024-03-01T10:00:00.0000000Z"
        );
    }

    #[test]
    fn test_extract_accepts_empty_and_scalar_keys() {
        assert_eq!(extract_key(&json!({FIELD: ""}), FIELD).unwrap(), "");
        assert_eq!(extract_key(&json!({FIELD: 1700000000}), FIELD).unwrap(), "1700000000");
        assert_eq!(extract_key(&json!({FIELD: 1.5}), FIELD).unwrap(), "1.5");
        assert_eq!(extract_key(&json!({FIELD: false}), FIELD).unwrap(), "false");
    }

    #[test]
    fn test_extract_is_case_sensitive() {
        let record = json!({"eventprocessedutctime": "t"});
        assert_eq!(
            extract_key(&record, FIELD),
            Err(KeyError::Missing {
                field: FIELD.to_string()
            })
        );
    }

    #[test]
    fn test_extract_rejects_structured_values() {
        for (value, kind) in [
            (json!(null), "null"),
            (json!([1]), "array"),
            (json!({"a": 1}), "object"),
        ] {
            let record = json!({FIELD: value});
            assert_eq!(
                extract_key(&record, FIELD),
                Err(KeyError::NotRepresentable {
                    field: FIELD.to_string(),
                    kind
                })
            );
        }
    }

    #[test]
    fn test_extract_from_non_object() {
        assert_eq!(
            extract_key(&json!("loose string"), FIELD),
            Err(KeyError::NotARecord { kind: "string" })
        );
    }
}
