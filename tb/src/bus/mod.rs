//! Bus binding interface
//!
//! The bridge talks to the pub/sub bus only through [`BusBinding`]. A
//! binding lists published topics, resolves type names to schemas, and
//! creates subscriptions whose callbacks may fire on any thread.

mod convert;
mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::BusError;
use crate::topic::TopicInfo;

pub use convert::{JsonRecordConverter, RecordConverter};
pub use memory::{MemoryBus, MemorySubscription};

/// Resolved message schema; opaque to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    type_name: String,
}

impl MessageSchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// A raw message as delivered by the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Coordinate frame declared in the message header, if any
    pub frame_id: Option<String>,
    /// Header timestamp, if any
    pub stamp: Option<DateTime<Utc>>,
    /// Decoded message body
    pub body: Value,
}

impl BusMessage {
    pub fn new(body: Value) -> Self {
        Self {
            frame_id: None,
            stamp: None,
            body,
        }
    }

    pub fn with_frame(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = Some(frame_id.into());
        self
    }

    pub fn with_stamp(mut self, stamp: DateTime<Utc>) -> Self {
        self.stamp = Some(stamp);
        self
    }
}

/// Delivery callback registered with a subscription
pub type BusCallback = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// A live bus subscription
pub trait BusSubscription: Send {
    fn topic(&self) -> &str;

    /// Stop delivery. No callback runs after this returns.
    fn unregister(self: Box<Self>) -> Result<(), BusError>;
}

/// Everything the bridge needs from the bus
pub trait BusBinding: Send + Sync {
    /// Currently published topics with their declared types
    fn published_topics(&self) -> Result<Vec<TopicInfo>, BusError>;

    /// Resolve a type name such as `"std_msgs/Int32"` to a schema
    fn resolve_schema(&self, type_name: &str) -> Result<MessageSchema, BusError>;

    /// Subscribe to a topic, invoking `callback` for every message
    fn subscribe(
        &self,
        topic: &str,
        schema: &MessageSchema,
        callback: BusCallback,
    ) -> Result<Box<dyn BusSubscription>, BusError>;
}

#[cfg(test)]
pub mod mock {
    //! Scriptable bus for unit tests

    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockState {
        topics: BTreeMap<String, String>,
        unknown_types: HashSet<String>,
        failing_subscribes: HashSet<String>,
        catalog_down: bool,
        callbacks: BTreeMap<String, BusCallback>,
    }

    /// Mock bus that records subscribe/unsubscribe calls
    #[derive(Default)]
    pub struct MockBus {
        state: Arc<Mutex<MockState>>,
        pub subscribe_calls: AtomicUsize,
        pub unsubscribe_calls: Arc<AtomicUsize>,
        pub resolve_calls: AtomicUsize,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advertise(&self, topic: &str, type_name: &str) {
            let mut state = self.state.lock().unwrap();
            state.topics.insert(topic.to_string(), type_name.to_string());
        }

        pub fn set_unknown_type(&self, type_name: &str, unknown: bool) {
            let mut state = self.state.lock().unwrap();
            if unknown {
                state.unknown_types.insert(type_name.to_string());
            } else {
                state.unknown_types.remove(type_name);
            }
        }

        pub fn fail_subscribe(&self, topic: &str) {
            self.state.lock().unwrap().failing_subscribes.insert(topic.to_string());
        }

        pub fn set_catalog_down(&self, down: bool) {
            self.state.lock().unwrap().catalog_down = down;
        }

        pub fn active(&self, topic: &str) -> bool {
            self.state.lock().unwrap().callbacks.contains_key(topic)
        }

        /// Invoke the registered callback, as a bus thread would
        pub fn deliver(&self, topic: &str, message: BusMessage) -> bool {
            let callback = self.state.lock().unwrap().callbacks.get(topic).cloned();
            match callback {
                Some(cb) => {
                    cb(message);
                    true
                }
                None => false,
            }
        }
    }

    struct MockSubscription {
        topic: String,
        state: Arc<Mutex<MockState>>,
        unsubscribes: Arc<AtomicUsize>,
    }

    impl BusSubscription for MockSubscription {
        fn topic(&self) -> &str {
            &self.topic
        }

        fn unregister(self: Box<Self>) -> Result<(), BusError> {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            self.state.lock().unwrap().callbacks.remove(&self.topic);
            Ok(())
        }
    }

    impl BusBinding for MockBus {
        fn published_topics(&self) -> Result<Vec<TopicInfo>, BusError> {
            let state = self.state.lock().unwrap();
            if state.catalog_down {
                return Err(BusError::Unavailable("mock catalog down".to_string()));
            }
            Ok(state.topics.iter().map(|(n, t)| TopicInfo::new(n, t)).collect())
        }

        fn resolve_schema(&self, type_name: &str) -> Result<MessageSchema, BusError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if state.unknown_types.contains(type_name) {
                return Err(BusError::UnknownType {
                    type_name: type_name.to_string(),
                    reason: "not installed".to_string(),
                });
            }
            Ok(MessageSchema::new(type_name))
        }

        fn subscribe(
            &self,
            topic: &str,
            _schema: &MessageSchema,
            callback: BusCallback,
        ) -> Result<Box<dyn BusSubscription>, BusError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            if state.failing_subscribes.contains(topic) {
                return Err(BusError::Subscribe {
                    topic: topic.to_string(),
                    reason: "mock failure".to_string(),
                });
            }
            state.callbacks.insert(topic.to_string(), callback);
            Ok(Box::new(MockSubscription {
                topic: topic.to_string(),
                state: self.state.clone(),
                unsubscribes: self.unsubscribe_calls.clone(),
            }))
        }
    }
}
