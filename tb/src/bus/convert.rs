//! Generic message-to-record conversion

use serde_json::{Map, Value};

use super::BusMessage;
use crate::error::ConvertError;

/// Converts a raw bus message into a flat field mapping
pub trait RecordConverter: Send + Sync {
    fn to_record(&self, message: &BusMessage) -> Result<Map<String, Value>, ConvertError>;
}

/// Converter for bindings that already decode bodies into JSON objects
///
/// Top-level keys starting with `_` are reserved for bridge metadata and
/// are rejected rather than silently overwritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordConverter;

impl RecordConverter for JsonRecordConverter {
    fn to_record(&self, message: &BusMessage) -> Result<Map<String, Value>, ConvertError> {
        let Value::Object(fields) = &message.body else {
            return Err(ConvertError::Unsupported(format!(
                "expected an object body, got {}",
                kind_of(&message.body)
            )));
        };

        if let Some(reserved) = fields.keys().find(|k| k.starts_with('_')) {
            return Err(ConvertError::Field {
                field: reserved.clone(),
                reason: "reserved metadata key".to_string(),
            });
        }

        Ok(fields.clone())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_body_converts() {
        let msg = BusMessage::new(json!({"ranges": [1.0, 2.5], "angle_min": -1.57}));
        let fields = JsonRecordConverter.to_record(&msg).unwrap();
        assert_eq!(fields["ranges"], json!([1.0, 2.5]));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_scalar_body_is_unsupported() {
        let err = JsonRecordConverter.to_record(&BusMessage::new(json!(42))).unwrap_err();
        assert!(matches!(err, ConvertError::Unsupported(_)));
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn test_reserved_key_rejected() {
        let msg = BusMessage::new(json!({"_topic_name": "spoofed", "data": 1}));
        let err = JsonRecordConverter.to_record(&msg).unwrap_err();
        assert!(matches!(err, ConvertError::Field { ref field, .. } if field == "_topic_name"));
    }
}
