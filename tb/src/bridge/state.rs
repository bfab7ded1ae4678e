//! State shared between the reconciliation pass and bus callbacks
//!
//! One mutex covers desired interest, the subscription table, throttle
//! state and the last catalog. A reconciliation pass holds it for the
//! whole pass; a delivery holds it for the throttle check and again for
//! the hand-off to the gateway, never while converting.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::interest::DesiredInterest;
use crate::table::SubscriptionTable;
use crate::throttle::ThrottleRegistry;
use crate::topic::TopicCatalog;

#[derive(Default)]
pub struct BridgeState {
    pub interest: DesiredInterest,
    pub table: SubscriptionTable,
    pub throttle: ThrottleRegistry,
    pub catalog: TopicCatalog,
}

impl BridgeState {
    /// Push the interest-derived interval into throttle state, if tracked
    pub fn refresh_interval(&mut self, topic: &str) {
        if let Some(interval) = self.interest.effective_interval(topic) {
            self.throttle.set_interval(topic, interval);
        }
    }
}

#[derive(Default)]
pub struct SharedState {
    inner: Mutex<BridgeState>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation leaves the state consistent, so a poisoned lock is
    /// still safe to use
    pub fn lock(&self) -> MutexGuard<'_, BridgeState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
