//! Outgoing records: the unit handed to the dispatch gateway
//!
//! A record is a flat JSON object. Payload fields sit next to reserved
//! metadata keys that all start with `_`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::topic::PseudoKind;

pub const TOPIC_NAME_KEY: &str = "_topic_name";
pub const TOPIC_TYPE_KEY: &str = "_topic_type";
pub const TIME_KEY: &str = "_time";
pub const TRANSFORM_KEY: &str = "_transform";
pub const ERROR_KEY: &str = "_error";

/// Translation component of a transform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Rotation component of a transform (unit quaternion)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Pose of one frame relative to another
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vector3,
    pub rotation: Quaternion,
}

/// Record handed to the transport layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutgoingRecord {
    fields: Map<String, Value>,
}

impl OutgoingRecord {
    /// Wrap converted payload fields
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Diagnostic record: carries topic identity and `_error`, no payload
    pub fn diagnostic(topic_name: &str, topic_type: &str, message: impl Into<String>) -> Self {
        let mut record = Self::default();
        record.set_topic(topic_name, topic_type);
        record.fields.insert(ERROR_KEY.to_string(), Value::String(message.into()));
        record
    }

    /// Record for a pseudo-topic producer, identity stamped from its kind
    pub fn pseudo(kind: PseudoKind, fields: Map<String, Value>) -> Self {
        let mut record = Self::new(fields);
        record.set_topic(kind.topic_name(), kind.topic_type());
        record
    }

    fn set_topic(&mut self, topic_name: &str, topic_type: &str) {
        self.fields
            .insert(TOPIC_NAME_KEY.to_string(), Value::String(topic_name.to_string()));
        self.fields
            .insert(TOPIC_TYPE_KEY.to_string(), Value::String(topic_type.to_string()));
    }

    /// Stamp topic identity and receipt time (milliseconds since epoch)
    pub fn stamp(&mut self, topic_name: &str, topic_type: &str, received: DateTime<Utc>) {
        self.set_topic(topic_name, topic_type);
        let millis = received.timestamp_micros() as f64 / 1000.0;
        self.fields.insert(TIME_KEY.to_string(), Value::from(millis));
    }

    /// Attach a transform; `None` records an explicit absence (`null`)
    pub fn set_transform(&mut self, transform: Option<Transform>) {
        let value = match transform {
            Some(t) => serde_json::to_value(t).unwrap_or(Value::Null),
            None => Value::Null,
        };
        self.fields.insert(TRANSFORM_KEY.to_string(), value);
    }

    pub fn topic_name(&self) -> Option<&str> {
        self.fields.get(TOPIC_NAME_KEY).and_then(Value::as_str)
    }

    pub fn topic_type(&self) -> Option<&str> {
        self.fields.get(TOPIC_TYPE_KEY).and_then(Value::as_str)
    }

    pub fn time_ms(&self) -> Option<f64> {
        self.fields.get(TIME_KEY).and_then(Value::as_f64)
    }

    pub fn error(&self) -> Option<&str> {
        self.fields.get(ERROR_KEY).and_then(Value::as_str)
    }

    /// A diagnostic record must not be treated as topic data
    pub fn is_diagnostic(&self) -> bool {
        self.fields.contains_key(ERROR_KEY)
    }

    /// `None` when no transform was attempted, `Some(None)` for explicit absence
    pub fn transform(&self) -> Option<Option<Transform>> {
        let value = self.fields.get(TRANSFORM_KEY)?;
        Some(serde_json::from_value(value.clone()).ok())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}
