//! Per-delivery message path
//!
//! Real topics: throttle, convert, stamp, augment, dispatch. Pseudo-topics
//! skip the throttle and the converter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::state::SharedState;
use super::stats::BridgeCounters;
use crate::bus::{BusMessage, RecordConverter};
use crate::dispatch::DispatchGateway;
use crate::error::DispatchError;
use crate::producer::PseudoPayload;
use crate::record::OutgoingRecord;
use crate::topic::TopicCatalog;
use crate::transform::{Augmentation, TransformAugmenter};

pub struct MessagePipeline {
    state: Arc<SharedState>,
    converter: Arc<dyn RecordConverter>,
    augmenter: TransformAugmenter,
    gateway: DispatchGateway,
    counters: Arc<BridgeCounters>,
    epsilon: Duration,
}

impl MessagePipeline {
    pub fn new(
        state: Arc<SharedState>,
        converter: Arc<dyn RecordConverter>,
        augmenter: TransformAugmenter,
        gateway: DispatchGateway,
        counters: Arc<BridgeCounters>,
        epsilon: Duration,
    ) -> Self {
        Self {
            state,
            converter,
            augmenter,
            gateway,
            counters,
            epsilon,
        }
    }

    /// Entry point bound to every real bus subscription
    pub fn on_bus_message(&self, topic: &str, type_name: &str, message: BusMessage) {
        self.deliver(topic, type_name, &message, Instant::now(), Utc::now());
    }

    /// Run one delivery at the given instant; returns whether a record was
    /// handed to the gateway
    pub(crate) fn deliver(
        &self,
        topic: &str,
        type_name: &str,
        message: &BusMessage,
        now: Instant,
        received: DateTime<Utc>,
    ) -> bool {
        let previous = {
            let mut state = self.state.lock();
            let Some(throttle) = state.throttle.get_mut(topic) else {
                trace!(%topic, "Delivery for untracked topic dropped");
                return false;
            };
            if !throttle.admits(now, self.epsilon) {
                self.counters.record_throttled();
                return false;
            }
            throttle.reserve(now)
        };

        let fields = match self.converter.to_record(message) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(%topic, %type_name, error = %e, "Failed to convert message, dropping");
                self.counters.record_conversion_failure();
                if let Some(throttle) = self.state.lock().throttle.get_mut(topic) {
                    throttle.release(now, previous);
                }
                return false;
            }
        };

        let mut record = OutgoingRecord::new(fields);
        record.stamp(topic, type_name, received);

        let augmentation = self.augmenter.augment(type_name, message.frame_id.as_deref());
        if let Augmentation::Absent(e) = &augmentation {
            warn!(%topic, base_frame = %self.augmenter.base_frame(), error = %e, "Transform unavailable, sending without it");
            self.counters.record_transform_failure();
        }
        if let Some(transform) = augmentation.into_field() {
            record.set_transform(transform);
        }

        // Teardown may have run while converting. The hand-off happens under
        // the lock so no record lands after the pass that removed the topic.
        let state = self.state.lock();
        if state.throttle.get(topic).is_none() {
            trace!(%topic, "Topic torn down during delivery, dropping");
            return false;
        }
        self.dispatch(record)
    }

    /// Entry point bound to every pseudo-topic producer
    pub fn on_pseudo(&self, payload: PseudoPayload) -> bool {
        let kind = payload.kind();
        let fields = match payload {
            PseudoPayload::KernelLog(text) => Map::from_iter([("msg".to_string(), Value::String(text))]),
            PseudoPayload::SystemStats(snapshot) => snapshot,
            PseudoPayload::Processes(processes) => {
                Map::from_iter([("processes".to_string(), Value::Array(processes))])
            }
        };
        trace!(topic = %kind, "MessagePipeline::on_pseudo");
        self.dispatch(OutgoingRecord::pseudo(kind, fields))
    }

    pub fn on_kernel_log(&self, text: impl Into<String>) -> bool {
        self.on_pseudo(PseudoPayload::KernelLog(text.into()))
    }

    pub fn on_system_stats(&self, snapshot: Map<String, Value>) -> bool {
        self.on_pseudo(PseudoPayload::SystemStats(snapshot))
    }

    pub fn on_processes(&self, processes: Vec<Value>) -> bool {
        self.on_pseudo(PseudoPayload::Processes(processes))
    }

    /// Hand a finished record to the gateway; failures are logged only
    pub(crate) fn dispatch(&self, record: OutgoingRecord) -> bool {
        let topic = record.topic_name().unwrap_or_default().to_string();
        match self.gateway.publish_record(record) {
            Ok(()) => {
                self.counters.record_dispatched();
                true
            }
            Err(DispatchError::NotReady) => {
                debug!(%topic, "Dispatch sink not ready, record dropped");
                self.counters.record_dispatch_failure();
                false
            }
            Err(e) => {
                warn!(%topic, error = %e, "Failed to dispatch record");
                self.counters.record_dispatch_failure();
                false
            }
        }
    }

    pub(crate) fn dispatch_catalog(&self, catalog: TopicCatalog) {
        match self.gateway.publish_catalog(catalog) {
            Ok(()) => {}
            Err(DispatchError::NotReady) => debug!("Dispatch sink not ready, catalog dropped"),
            Err(e) => {
                warn!(error = %e, "Failed to dispatch topic catalog");
                self.counters.record_dispatch_failure();
            }
        }
    }
}
