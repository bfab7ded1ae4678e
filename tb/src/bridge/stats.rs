//! Bridge counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Monotonic counters updated from every concurrency domain
#[derive(Debug, Default)]
pub struct BridgeCounters {
    passes: AtomicU64,
    dispatched: AtomicU64,
    throttled: AtomicU64,
    conversion_failures: AtomicU64,
    transform_failures: AtomicU64,
    dispatch_failures: AtomicU64,
    invalid_placeholders: AtomicU64,
    bus_errors: AtomicU64,
}

impl BridgeCounters {
    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conversion_failure(&self) {
        self.conversion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_placeholders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_error(&self) {
        self.bus_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the bridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Reconciliation passes completed
    pub passes: u64,
    /// Records handed to the dispatch gateway
    pub dispatched: u64,
    /// Deliveries dropped by the throttle
    pub throttled: u64,
    pub conversion_failures: u64,
    /// Qualifying deliveries sent with `_transform: null`
    pub transform_failures: u64,
    pub dispatch_failures: u64,
    /// Invalid placeholders installed (each with one diagnostic)
    pub invalid_placeholders: u64,
    pub bus_errors: u64,
    pub wanted_topics: usize,
    pub local_subscriptions: usize,
    pub throttled_topics: usize,
    pub known_topics: usize,
}

impl BridgeStats {
    pub(crate) fn from_counters(counters: &BridgeCounters) -> Self {
        Self {
            passes: BridgeCounters::load(&counters.passes),
            dispatched: BridgeCounters::load(&counters.dispatched),
            throttled: BridgeCounters::load(&counters.throttled),
            conversion_failures: BridgeCounters::load(&counters.conversion_failures),
            transform_failures: BridgeCounters::load(&counters.transform_failures),
            dispatch_failures: BridgeCounters::load(&counters.dispatch_failures),
            invalid_placeholders: BridgeCounters::load(&counters.invalid_placeholders),
            bus_errors: BridgeCounters::load(&counters.bus_errors),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let counters = BridgeCounters::default();
        counters.record_pass();
        counters.record_pass();
        counters.record_throttled();
        counters.record_invalid();

        let stats = BridgeStats::from_counters(&counters);
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.throttled, 1);
        assert_eq!(stats.invalid_placeholders, 1);
        assert_eq!(stats.dispatched, 0);
    }
}
