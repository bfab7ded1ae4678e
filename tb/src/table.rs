//! Local subscriptions owned by the bridge, keyed by topic name

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::bus::BusSubscription;
use crate::producer::ProducerHandle;

/// What backs a topic locally
pub enum LocalSubscription {
    /// Live bus subscription
    Real(Box<dyn BusSubscription>),
    /// Running synthetic producer
    Pseudo(Box<dyn ProducerHandle>),
    /// Placeholder for a topic whose type could not be resolved
    Invalid,
}

/// Variant tag of a [`LocalSubscription`], for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Real,
    Pseudo,
    Invalid,
}

impl LocalSubscription {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            LocalSubscription::Real(_) => SubscriptionKind::Real,
            LocalSubscription::Pseudo(_) => SubscriptionKind::Pseudo,
            LocalSubscription::Invalid => SubscriptionKind::Invalid,
        }
    }

    /// Stop whatever backs the subscription. Unregister errors are logged.
    pub fn release(self, topic: &str) {
        match self {
            LocalSubscription::Real(sub) => {
                if let Err(e) = sub.unregister() {
                    warn!(%topic, error = %e, "Failed to unregister bus subscription");
                }
            }
            LocalSubscription::Pseudo(handle) => handle.stop(),
            LocalSubscription::Invalid => {}
        }
        debug!(%topic, "LocalSubscription::release: released");
    }
}

/// topic -> local subscription; at most one entry per topic
#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<String, LocalSubscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a subscription; an existing entry is never replaced and the
    /// rejected subscription is handed back
    pub fn install(&mut self, topic: &str, sub: LocalSubscription) -> Result<(), LocalSubscription> {
        if self.entries.contains_key(topic) {
            return Err(sub);
        }
        self.entries.insert(topic.to_string(), sub);
        Ok(())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn remove(&mut self, topic: &str) -> Option<LocalSubscription> {
        self.entries.remove(topic)
    }

    pub fn kind(&self, topic: &str) -> Option<SubscriptionKind> {
        self.entries.get(topic).map(LocalSubscription::kind)
    }

    /// Topic names with a local subscription, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
