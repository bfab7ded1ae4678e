//! Desired interest: which clients want which topics, and how often
//!
//! Mutated only on behalf of the transport layer. A topic whose client set
//! is empty is indistinguishable from an absent topic.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::throttle::effective_interval;

/// Opaque handle for a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// topic -> (client -> requested minimum interval)
#[derive(Debug, Default)]
pub struct DesiredInterest {
    topics: HashMap<String, HashMap<ClientId, Duration>>,
}

impl DesiredInterest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or update) a client's interest in a topic
    pub fn add(&mut self, topic: &str, client: ClientId, interval: Duration) {
        self.topics.entry(topic.to_string()).or_default().insert(client, interval);
    }

    /// Drop a client's interest in a topic; the topic entry may be left empty
    pub fn remove(&mut self, topic: &str, client: ClientId) -> bool {
        self.topics
            .get_mut(topic)
            .map(|clients| clients.remove(&client).is_some())
            .unwrap_or(false)
    }

    /// Drop a client from every topic, returning the topics it was in
    pub fn remove_client(&mut self, client: ClientId) -> Vec<String> {
        self.topics
            .iter_mut()
            .filter_map(|(topic, clients)| clients.remove(&client).map(|_| topic.clone()))
            .collect()
    }

    /// Whether at least one client currently wants the topic
    pub fn is_wanted(&self, topic: &str) -> bool {
        self.topics.get(topic).is_some_and(|clients| !clients.is_empty())
    }

    /// Topics with nonzero interest
    pub fn wanted_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, clients)| !clients.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn client_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(HashMap::len).unwrap_or(0)
    }

    /// Most demanding interval across the topic's clients
    pub fn effective_interval(&self, topic: &str) -> Option<Duration> {
        self.topics
            .get(topic)
            .and_then(|clients| effective_interval(clients.values().copied()))
    }

    /// Forget topics nobody wants any more
    pub fn prune(&mut self) {
        self.topics.retain(|_, clients| !clients.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn test_empty_set_is_not_wanted() {
        let mut interest = DesiredInterest::new();
        let client = ClientId::new();

        interest.add("/scan", client, ms(100));
        assert!(interest.is_wanted("/scan"));

        assert!(interest.remove("/scan", client));
        assert!(!interest.is_wanted("/scan"));
        assert!(!interest.is_wanted("/never"));
        assert!(interest.wanted_topics().is_empty());
    }

    #[test]
    fn test_effective_interval_tracks_membership() {
        let mut interest = DesiredInterest::new();
        let slow = ClientId::new();
        let fast = ClientId::new();

        interest.add("/scan", slow, ms(500));
        interest.add("/scan", fast, ms(50));
        assert_eq!(interest.effective_interval("/scan"), Some(ms(50)));

        interest.remove("/scan", fast);
        assert_eq!(interest.effective_interval("/scan"), Some(ms(500)));

        interest.remove("/scan", slow);
        assert_eq!(interest.effective_interval("/scan"), None);
    }

    #[test]
    fn test_re_adding_updates_interval() {
        let mut interest = DesiredInterest::new();
        let client = ClientId::new();
        interest.add("/map", client, ms(1000));
        interest.add("/map", client, ms(200));
        assert_eq!(interest.client_count("/map"), 1);
        assert_eq!(interest.effective_interval("/map"), Some(ms(200)));
    }

    #[test]
    fn test_remove_client_touches_every_topic() {
        let mut interest = DesiredInterest::new();
        let leaving = ClientId::new();
        let staying = ClientId::new();
        interest.add("/scan", leaving, ms(100));
        interest.add("/map", leaving, ms(100));
        interest.add("/map", staying, ms(100));

        let mut topics = interest.remove_client(leaving);
        topics.sort();
        assert_eq!(topics, vec!["/map".to_string(), "/scan".to_string()]);
        assert_eq!(interest.wanted_topics(), vec!["/map".to_string()]);

        interest.prune();
        assert_eq!(interest.client_count("/scan"), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut interest = DesiredInterest::new();
        assert!(!interest.remove("/scan", ClientId::new()));
    }
}
