//! Subscription synchronizer
//!
//! Aligns local subscriptions with desired interest. Each pass runs under
//! the shared state lock, so concurrent passes serialize and deliveries
//! never observe a half-built entry.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use super::pipeline::MessagePipeline;
use super::state::{BridgeState, SharedState};
use super::stats::BridgeCounters;
use crate::bus::{BusBinding, BusCallback};
use crate::producer::{ProducerFactory, PseudoCallback};
use crate::record::OutgoingRecord;
use crate::table::LocalSubscription;
use crate::topic::{PseudoKind, TopicCatalog, TopicKind, classify};

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Whether the bus answered the catalog query
    pub catalog_refreshed: bool,
    pub subscribed: Vec<String>,
    pub invalid: Vec<String>,
    pub removed: Vec<String>,
}

impl PassReport {
    pub fn is_noop(&self) -> bool {
        self.subscribed.is_empty() && self.invalid.is_empty() && self.removed.is_empty()
    }
}

pub struct Synchronizer {
    bus: Arc<dyn BusBinding>,
    producers: Arc<dyn ProducerFactory>,
    state: Arc<SharedState>,
    pipeline: Arc<MessagePipeline>,
    counters: Arc<BridgeCounters>,
    strict: bool,
}

impl Synchronizer {
    pub fn new(
        bus: Arc<dyn BusBinding>,
        producers: Arc<dyn ProducerFactory>,
        state: Arc<SharedState>,
        pipeline: Arc<MessagePipeline>,
        counters: Arc<BridgeCounters>,
        strict: bool,
    ) -> Self {
        Self {
            bus,
            producers,
            state,
            pipeline,
            counters,
            strict,
        }
    }

    /// Run one full pass. Bus errors are logged and never abort the pass.
    pub fn reconcile(&self) -> PassReport {
        self.reconcile_with(|| {})
    }

    /// Run a pass, calling `on_locked` once the state lock is held
    pub fn reconcile_with(&self, on_locked: impl FnOnce()) -> PassReport {
        let mut guard = self.state.lock();
        on_locked();
        let state = &mut *guard;
        let mut report = PassReport::default();

        match self.bus.published_topics() {
            Ok(topics) => {
                let catalog: TopicCatalog = topics.into_iter().map(|t| (t.name, t.type_name)).collect();
                state.catalog = catalog.clone();
                report.catalog_refreshed = true;
                self.pipeline.dispatch_catalog(catalog);
            }
            Err(e) => {
                warn!(error = %e, "Failed to list published topics");
                self.counters.record_bus_error();
            }
        }

        for topic in state.interest.wanted_topics() {
            if state.table.contains(&topic) {
                continue;
            }
            match classify(&topic) {
                TopicKind::Pseudo(kind) => self.start_pseudo(state, &topic, kind, &mut report),
                TopicKind::UnknownPseudo => {
                    if self.strict {
                        warn!(%topic, "No producer for reserved topic name");
                    } else {
                        debug!(%topic, "No producer for reserved topic name");
                    }
                }
                TopicKind::Real if report.catalog_refreshed => self.subscribe_real(state, &topic, &mut report),
                TopicKind::Real => {
                    debug!(%topic, "Catalog unavailable, deferring subscription");
                }
            }
        }

        for topic in state.table.topics() {
            if state.interest.is_wanted(&topic) {
                continue;
            }
            if let Some(sub) = state.table.remove(&topic) {
                sub.release(&topic);
            }
            state.throttle.remove(&topic);
            report.removed.push(topic);
        }
        state.interest.prune();

        drop(guard);
        self.counters.record_pass();
        if !report.is_noop() {
            info!(
                subscribed = ?report.subscribed,
                invalid = ?report.invalid,
                removed = ?report.removed,
                "Subscriptions reconciled"
            );
        }
        report
    }

    fn start_pseudo(&self, state: &mut BridgeState, topic: &str, kind: PseudoKind, report: &mut PassReport) {
        match self.producers.start(kind, self.pseudo_callback()) {
            Ok(handle) => {
                debug!(%topic, "Pseudo producer started");
                if let Err(rejected) = state.table.install(topic, LocalSubscription::Pseudo(handle)) {
                    rejected.release(topic);
                } else {
                    report.subscribed.push(topic.to_string());
                }
            }
            Err(e) => {
                warn!(%topic, error = %e, "Failed to start pseudo producer");
                self.install_invalid(state, topic, kind.topic_type(), e.to_string(), report);
            }
        }
    }

    fn subscribe_real(&self, state: &mut BridgeState, topic: &str, report: &mut PassReport) {
        let Some(type_name) = state.catalog.get(topic).cloned() else {
            if self.strict {
                warn!(%topic, "Topic is not published, skipping");
            } else {
                debug!(%topic, "Topic is not published, skipping");
            }
            return;
        };

        let schema = match self.bus.resolve_schema(&type_name) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(%topic, %type_name, error = %e, "Failed to resolve message type");
                self.install_invalid(state, topic, &type_name, e.to_string(), report);
                return;
            }
        };

        let Some(interval) = state.interest.effective_interval(topic) else {
            return;
        };
        state.throttle.insert(topic, interval);

        match self.bus.subscribe(topic, &schema, self.bus_callback(topic, &type_name)) {
            Ok(sub) => {
                debug!(%topic, %type_name, ?interval, "Subscribed");
                if let Err(rejected) = state.table.install(topic, LocalSubscription::Real(sub)) {
                    rejected.release(topic);
                } else {
                    report.subscribed.push(topic.to_string());
                }
            }
            Err(e) => {
                warn!(%topic, %type_name, error = %e, "Failed to subscribe, will retry");
                self.counters.record_bus_error();
                state.throttle.remove(topic);
            }
        }
    }

    /// Standing placeholder plus exactly one diagnostic for clients
    fn install_invalid(
        &self,
        state: &mut BridgeState,
        topic: &str,
        type_name: &str,
        reason: String,
        report: &mut PassReport,
    ) {
        if state.table.install(topic, LocalSubscription::Invalid).is_err() {
            return;
        }
        self.counters.record_invalid();
        report.invalid.push(topic.to_string());
        self.pipeline.dispatch(OutgoingRecord::diagnostic(topic, type_name, reason));
    }

    fn bus_callback(&self, topic: &str, type_name: &str) -> BusCallback {
        let pipeline: Weak<MessagePipeline> = Arc::downgrade(&self.pipeline);
        let topic = topic.to_string();
        let type_name = type_name.to_string();
        Arc::new(move |message| {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.on_bus_message(&topic, &type_name, message);
            }
        })
    }

    fn pseudo_callback(&self) -> PseudoCallback {
        let pipeline: Weak<MessagePipeline> = Arc::downgrade(&self.pipeline);
        Arc::new(move |payload| {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.on_pseudo(payload);
            }
        })
    }
}
