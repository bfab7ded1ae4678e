//! Per-topic delivery throttling
//!
//! Each subscribed real topic carries a minimum re-delivery interval (the
//! smallest interval any interested client asked for) and the time of the
//! last accepted delivery. Deliveries arriving sooner are dropped, never
//! queued.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tolerance applied to interval comparisons
pub const DEFAULT_EPSILON: Duration = Duration::from_micros(100);

/// Throttle state for one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleState {
    min_interval: Duration,
    /// `None` until the first accepted delivery (the epoch)
    last: Option<Instant>,
}

impl ThrottleState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last(&self) -> Option<Instant> {
        self.last
    }

    /// Whether a delivery at `now` is far enough from the last accepted one
    pub fn admits(&self, now: Instant, epsilon: Duration) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) + epsilon >= self.min_interval,
        }
    }

    /// Claim the slot at `now`, returning the previous timestamp for rollback
    pub fn reserve(&mut self, now: Instant) -> Option<Instant> {
        self.last.replace(now)
    }

    /// Undo a reservation, unless a later delivery already moved `last`
    pub fn release(&mut self, reserved: Instant, previous: Option<Instant>) {
        if self.last == Some(reserved) {
            self.last = previous;
        }
    }
}

/// Throttle state for every real topic with a live subscription
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    topics: HashMap<String, ThrottleState>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a topic with a fresh state (last = epoch)
    pub fn insert(&mut self, topic: &str, min_interval: Duration) {
        self.topics.insert(topic.to_string(), ThrottleState::new(min_interval));
    }

    /// Update the interval of a tracked topic; untracked topics are ignored
    pub fn set_interval(&mut self, topic: &str, min_interval: Duration) {
        if let Some(state) = self.topics.get_mut(topic) {
            state.min_interval = min_interval;
        }
    }

    pub fn get(&self, topic: &str) -> Option<&ThrottleState> {
        self.topics.get(topic)
    }

    pub fn get_mut(&mut self, topic: &str) -> Option<&mut ThrottleState> {
        self.topics.get_mut(topic)
    }

    pub fn remove(&mut self, topic: &str) -> Option<ThrottleState> {
        self.topics.remove(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Effective interval for a set of client intervals: the most demanding one
pub fn effective_interval<I>(intervals: I) -> Option<Duration>
where
    I: IntoIterator<Item = Duration>,
{
    intervals.into_iter().min()
}
