//! Client wire frames
//!
//! Newline-delimited JSON. Every frame is a two-element array: a one-letter
//! operation code and an object payload.

use serde_json::{Map, Value, json};

use crate::error::ProtocolError;
use crate::record::OutgoingRecord;
use crate::topic::TopicCatalog;

pub const OP_TOPICS: &str = "t";
pub const OP_MESSAGE: &str = "m";
pub const OP_PING: &str = "p";
pub const OP_LATENCY: &str = "y";
pub const OP_SUBSCRIBE: &str = "s";
pub const OP_UNSUBSCRIBE: &str = "u";
pub const OP_PONG: &str = "q";

pub const PING_SEQ_KEY: &str = "_ping_seq";
pub const PING_TIME_KEY: &str = "_ping_time";
pub const PONG_TIME_KEY: &str = "_pong_time";

/// Frames sent to clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Topics(TopicCatalog),
    Message(OutgoingRecord),
    Ping { seq: u64, time_ms: f64 },
    Latency { seq: u64, latency_ms: f64, clock_diff_ms: f64 },
}

impl ServerFrame {
    pub fn op(&self) -> &'static str {
        match self {
            ServerFrame::Topics(_) => OP_TOPICS,
            ServerFrame::Message(_) => OP_MESSAGE,
            ServerFrame::Ping { .. } => OP_PING,
            ServerFrame::Latency { .. } => OP_LATENCY,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let payload = match self {
            ServerFrame::Topics(catalog) => serde_json::to_value(catalog)?,
            ServerFrame::Message(record) => serde_json::to_value(record)?,
            ServerFrame::Ping { seq, time_ms } => json!({ PING_SEQ_KEY: seq, PING_TIME_KEY: time_ms }),
            ServerFrame::Latency {
                seq,
                latency_ms,
                clock_diff_ms,
            } => json!({ PING_SEQ_KEY: seq, "latency": latency_ms, "clock_diff": clock_diff_ms }),
        };
        Ok(Value::Array(vec![Value::String(self.op().to_string()), payload]))
    }

    /// Serialize as one line, without the trailing newline
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}

/// Frames received from clients
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Subscribe { topic: String, max_update_rate: Option<f64> },
    Unsubscribe { topic: String },
    Pong { seq: u64, pong_time_ms: f64 },
}

impl ClientFrame {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Array(parts) = value else {
            return Err(ProtocolError::Malformed("expected a two-element array".to_string()));
        };
        let [op, payload] = parts.as_slice() else {
            return Err(ProtocolError::Malformed(format!("expected 2 elements, got {}", parts.len())));
        };
        let op = op
            .as_str()
            .ok_or_else(|| ProtocolError::Malformed("operation must be a string".to_string()))?;
        let payload = payload
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("payload must be an object".to_string()))?;

        match op {
            OP_SUBSCRIBE => Ok(ClientFrame::Subscribe {
                topic: topic_name(payload)?,
                max_update_rate: payload.get("maxUpdateRate").and_then(Value::as_f64),
            }),
            OP_UNSUBSCRIBE => Ok(ClientFrame::Unsubscribe {
                topic: topic_name(payload)?,
            }),
            OP_PONG => Ok(ClientFrame::Pong {
                seq: payload
                    .get(PING_SEQ_KEY)
                    .and_then(Value::as_u64)
                    .ok_or(ProtocolError::MissingField(PING_SEQ_KEY))?,
                pong_time_ms: payload
                    .get(PONG_TIME_KEY)
                    .and_then(Value::as_f64)
                    .ok_or(ProtocolError::MissingField(PONG_TIME_KEY))?,
            }),
            other => Err(ProtocolError::UnknownOp(other.to_string())),
        }
    }
}

fn topic_name(payload: &Map<String, Value>) -> Result<String, ProtocolError> {
    payload
        .get("topicName")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(ProtocolError::MissingField("topicName"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let frame = ClientFrame::parse(r#"["s", {"topicName": "/scan", "maxUpdateRate": 10}]"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                topic: "/scan".to_string(),
                max_update_rate: Some(10.0)
            }
        );

        let frame = ClientFrame::parse(r#"["s", {"topicName": "_dmesg"}]"#).unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe { max_update_rate: None, .. }));
    }

    #[test]
    fn test_parse_unsubscribe_and_pong() {
        assert_eq!(
            ClientFrame::parse(r#"["u", {"topicName": "/scan"}]"#).unwrap(),
            ClientFrame::Unsubscribe {
                topic: "/scan".to_string()
            }
        );
        assert_eq!(
            ClientFrame::parse(r#"["q", {"_ping_seq": 3, "_pong_time": 1700000000123.5}]"#).unwrap(),
            ClientFrame::Pong {
                seq: 3,
                pong_time_ms: 1_700_000_000_123.5
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(matches!(ClientFrame::parse("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(ClientFrame::parse(r#"{"op": "s"}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(ClientFrame::parse(r#"["s"]"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(ClientFrame::parse(r#"["s", []]"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(
            ClientFrame::parse(r#"["s", {}]"#),
            Err(ProtocolError::MissingField("topicName"))
        ));
        assert!(matches!(
            ClientFrame::parse(r#"["x", {}]"#),
            Err(ProtocolError::UnknownOp(op)) if op == "x"
        ));
        assert!(matches!(
            ClientFrame::parse(r#"["q", {"_ping_seq": 1}]"#),
            Err(ProtocolError::MissingField("_pong_time"))
        ));
    }

    #[test]
    fn test_server_frame_lines() {
        let mut catalog = TopicCatalog::new();
        catalog.insert("/scan".to_string(), "sensor_msgs/LaserScan".to_string());
        assert_eq!(
            ServerFrame::Topics(catalog).to_line().unwrap(),
            r#"["t",{"/scan":"sensor_msgs/LaserScan"}]"#
        );

        let ping = ServerFrame::Ping { seq: 7, time_ms: 1500.0 }.to_value().unwrap();
        assert_eq!(ping, json!(["p", {"_ping_seq": 7, "_ping_time": 1500.0}]));

        let latency = ServerFrame::Latency {
            seq: 7,
            latency_ms: 12.5,
            clock_diff_ms: -3.0,
        };
        assert_eq!(
            latency.to_value().unwrap(),
            json!(["y", {"_ping_seq": 7, "latency": 12.5, "clock_diff": -3.0}])
        );
    }

    #[test]
    fn test_message_frame_carries_record_fields() {
        let record = OutgoingRecord::diagnostic("/widgets", "custom_msgs/Widget", "Could not load");
        let value = ServerFrame::Message(record).to_value().unwrap();
        assert_eq!(value[0], json!("m"));
        assert_eq!(value[1]["_error"], json!("Could not load"));
    }
}
