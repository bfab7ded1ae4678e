//! In-process bus binding
//!
//! `MemoryBus` keeps a type registry, a set of advertised topics with
//! publisher counts, and subscriber callbacks. Callbacks run on the thread
//! that calls [`MemoryBus::publish`], outside the bus lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use super::{BusBinding, BusCallback, BusMessage, BusSubscription, MessageSchema};
use crate::error::BusError;
use crate::topic::TopicInfo;

struct Advertised {
    type_name: String,
    publishers: usize,
}

struct Subscriber {
    topic: String,
    callback: BusCallback,
}

#[derive(Default)]
struct MemoryBusInner {
    types: HashSet<String>,
    topics: BTreeMap<String, Advertised>,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
    offline: bool,
}

/// Loopback bus for single-process deployments and tests
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusInner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a type name resolvable
    pub fn register_type(&self, type_name: &str) {
        debug!(%type_name, "MemoryBus::register_type: called");
        self.lock().types.insert(type_name.to_string());
    }

    /// Make a type name unresolvable again
    pub fn unregister_type(&self, type_name: &str) {
        debug!(%type_name, "MemoryBus::unregister_type: called");
        self.lock().types.remove(type_name);
    }

    /// Add a publisher for a topic. The first publisher fixes the type.
    pub fn advertise(&self, topic: &str, type_name: &str) {
        debug!(%topic, %type_name, "MemoryBus::advertise: called");
        let mut inner = self.lock();
        inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Advertised {
                type_name: type_name.to_string(),
                publishers: 0,
            })
            .publishers += 1;
    }

    /// Remove a publisher; the topic disappears with its last publisher
    pub fn retire(&self, topic: &str) {
        debug!(%topic, "MemoryBus::retire: called");
        let mut inner = self.lock();
        if let Some(advertised) = inner.topics.get_mut(topic) {
            advertised.publishers = advertised.publishers.saturating_sub(1);
            if advertised.publishers == 0 {
                inner.topics.remove(topic);
            }
        }
    }

    /// Simulate losing (or regaining) the bus
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Deliver a message to every subscriber of `topic`; returns how many
    pub fn publish(&self, topic: &str, message: BusMessage) -> usize {
        let callbacks: Vec<BusCallback> = {
            let inner = self.lock();
            inner
                .subscribers
                .values()
                .filter(|s| s.topic == topic)
                .map(|s| s.callback.clone())
                .collect()
        };

        trace!(%topic, subscribers = callbacks.len(), "MemoryBus::publish");
        for callback in &callbacks {
            callback(message.clone());
        }
        callbacks.len()
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().subscribers.values().filter(|s| s.topic == topic).count()
    }
}

impl BusBinding for MemoryBus {
    fn published_topics(&self) -> Result<Vec<TopicInfo>, BusError> {
        let inner = self.lock();
        if inner.offline {
            return Err(BusError::Unavailable("memory bus offline".to_string()));
        }
        Ok(inner
            .topics
            .iter()
            .map(|(name, advertised)| TopicInfo::new(name, &advertised.type_name))
            .collect())
    }

    fn resolve_schema(&self, type_name: &str) -> Result<MessageSchema, BusError> {
        if self.lock().types.contains(type_name) {
            Ok(MessageSchema::new(type_name))
        } else {
            Err(BusError::UnknownType {
                type_name: type_name.to_string(),
                reason: "type not registered".to_string(),
            })
        }
    }

    fn subscribe(
        &self,
        topic: &str,
        schema: &MessageSchema,
        callback: BusCallback,
    ) -> Result<Box<dyn BusSubscription>, BusError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                reason: "memory bus offline".to_string(),
            });
        }
        if let Some(advertised) = inner.topics.get(topic)
            && advertised.type_name != schema.type_name()
        {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                reason: format!(
                    "type mismatch: topic carries {}, requested {}",
                    advertised.type_name,
                    schema.type_name()
                ),
            });
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                topic: topic.to_string(),
                callback,
            },
        );
        debug!(%topic, id, "MemoryBus::subscribe: registered");

        Ok(Box::new(MemorySubscription {
            id,
            topic: topic.to_string(),
            inner: self.inner.clone(),
        }))
    }
}

/// Subscription handle returned by [`MemoryBus`]
pub struct MemorySubscription {
    id: u64,
    topic: String,
    inner: Arc<Mutex<MemoryBusInner>>,
}

impl BusSubscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn unregister(self: Box<Self>) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.subscribers.remove(&self.id) {
            Some(_) => {
                debug!(topic = %self.topic, id = self.id, "MemorySubscription::unregister: removed");
                Ok(())
            }
            None => Err(BusError::Unsubscribe {
                topic: self.topic.clone(),
                reason: "subscription already gone".to_string(),
            }),
        }
    }
}
