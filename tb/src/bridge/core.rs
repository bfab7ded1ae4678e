//! The bridge context object
//!
//! `Bridge` owns the shared state and wires the synchronizer, the message
//! pipeline and the dispatch gateway together. It is cheap to clone and is
//! passed explicitly to every component that needs it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::pipeline::MessagePipeline;
use super::schedule::{run_liveness_loop, run_sync_loop};
use super::state::SharedState;
use super::stats::{BridgeCounters, BridgeStats};
use super::sync::{PassReport, Synchronizer};
use crate::bus::{BusBinding, JsonRecordConverter, RecordConverter};
use crate::config::BridgeConfig;
use crate::dispatch::DispatchGateway;
use crate::interest::ClientId;
use crate::producer::{NoProducers, ProducerFactory};
use crate::table::SubscriptionKind;
use crate::topic::TopicCatalog;
use crate::transform::{StaticTransforms, TransformAugmenter, TransformProvider};

struct BridgeInner {
    config: BridgeConfig,
    state: Arc<SharedState>,
    pipeline: Arc<MessagePipeline>,
    sync: Synchronizer,
    gateway: DispatchGateway,
    counters: Arc<BridgeCounters>,
    /// A scheduled pass has not yet taken the state lock
    reconcile_queued: AtomicBool,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Assembles a [`Bridge`]; everything but the bus has a default
pub struct BridgeBuilder {
    bus: Arc<dyn BusBinding>,
    config: BridgeConfig,
    producers: Arc<dyn ProducerFactory>,
    converter: Arc<dyn RecordConverter>,
    transforms: Box<dyn TransformProvider>,
    gateway: DispatchGateway,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn producers(mut self, producers: Arc<dyn ProducerFactory>) -> Self {
        self.producers = producers;
        self
    }

    pub fn converter(mut self, converter: Arc<dyn RecordConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn transforms(mut self, transforms: Box<dyn TransformProvider>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn gateway(mut self, gateway: DispatchGateway) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn build(self) -> Bridge {
        let state = Arc::new(SharedState::new());
        let counters = Arc::new(BridgeCounters::default());
        let augmenter = TransformAugmenter::new(
            self.transforms,
            self.config.transform_types.clone(),
            self.config.base_frame(),
        );
        let pipeline = Arc::new(MessagePipeline::new(
            state.clone(),
            self.converter,
            augmenter,
            self.gateway.clone(),
            counters.clone(),
            self.config.throttle_epsilon(),
        ));
        let sync = Synchronizer::new(
            self.bus,
            self.producers,
            state.clone(),
            pipeline.clone(),
            counters.clone(),
            self.config.strict_topics,
        );
        debug!(base_frame = %self.config.base_frame(), strict = self.config.strict_topics, "Bridge built");

        Bridge {
            inner: Arc::new(BridgeInner {
                config: self.config,
                state,
                pipeline,
                sync,
                gateway: self.gateway,
                counters,
                reconcile_queued: AtomicBool::new(false),
            }),
        }
    }
}

impl Bridge {
    pub fn builder(bus: Arc<dyn BusBinding>) -> BridgeBuilder {
        BridgeBuilder {
            bus,
            config: BridgeConfig::default(),
            producers: Arc::new(NoProducers),
            converter: Arc::new(JsonRecordConverter),
            transforms: Box::new(StaticTransforms::new()),
            gateway: DispatchGateway::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &DispatchGateway {
        &self.inner.gateway
    }

    /// Pipeline entry points, for producers wired outside the factory
    pub fn pipeline(&self) -> &MessagePipeline {
        &self.inner.pipeline
    }

    /// Register a client's interest; the topic's throttle interval follows
    pub fn add_interest(&self, topic: &str, client: ClientId, interval: Duration) {
        let mut state = self.inner.state.lock();
        state.interest.add(topic, client, interval);
        state.refresh_interval(topic);
        debug!(%topic, %client, ?interval, clients = state.interest.client_count(topic), "Interest added");
    }

    pub fn remove_interest(&self, topic: &str, client: ClientId) -> bool {
        let mut state = self.inner.state.lock();
        let removed = state.interest.remove(topic, client);
        state.refresh_interval(topic);
        debug!(%topic, %client, removed, "Interest removed");
        removed
    }

    /// Drop every interest of a departing client
    pub fn remove_client(&self, client: ClientId) -> Vec<String> {
        let mut state = self.inner.state.lock();
        let topics = state.interest.remove_client(client);
        for topic in &topics {
            state.refresh_interval(topic);
        }
        debug!(%client, ?topics, "Client interest cleared");
        topics
    }

    /// Last catalog reported by the bus
    pub fn catalog(&self) -> TopicCatalog {
        self.inner.state.lock().catalog.clone()
    }

    /// Run one reconciliation pass on the calling thread
    pub fn reconcile(&self) -> PassReport {
        self.inner.sync.reconcile()
    }

    /// Run a reconciliation pass on the blocking pool
    pub fn request_reconcile(&self) -> JoinHandle<PassReport> {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.reconcile())
    }

    /// Queue a pass on the blocking pool unless one is already waiting.
    /// Returns false when the request was folded into the queued pass.
    pub fn schedule_reconcile(&self) -> bool {
        if self.inner.reconcile_queued.swap(true, Ordering::AcqRel) {
            trace!("Reconcile already queued");
            return false;
        }
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || {
            // Cleared under the lock so requests made during the pass queue another one
            bridge
                .inner
                .sync
                .reconcile_with(|| bridge.inner.reconcile_queued.store(false, Ordering::Release));
        });
        true
    }

    pub fn subscription_kind(&self, topic: &str) -> Option<SubscriptionKind> {
        self.inner.state.lock().table.kind(topic)
    }

    pub fn local_topics(&self) -> Vec<String> {
        self.inner.state.lock().table.topics()
    }

    /// Current effective throttle interval of a subscribed real topic
    pub fn throttle_interval(&self, topic: &str) -> Option<Duration> {
        self.inner.state.lock().throttle.get(topic).map(|t| t.min_interval())
    }

    pub fn stats(&self) -> BridgeStats {
        let mut stats = BridgeStats::from_counters(&self.inner.counters);
        let state = self.inner.state.lock();
        stats.wanted_topics = state.interest.wanted_topics().len();
        stats.local_subscriptions = state.table.len();
        stats.throttled_topics = state.throttle.len();
        stats.known_topics = state.catalog.len();
        stats
    }

    /// Start the reconciliation and liveness loops
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(run_sync_loop(
                self.clone(),
                self.inner.config.sync_interval(),
                shutdown.clone(),
            )),
            tokio::spawn(run_liveness_loop(
                self.inner.gateway.clone(),
                self.inner.config.ping_interval(),
                shutdown,
            )),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusMessage;
    use crate::bus::mock::MockBus;
    use crate::dispatch::{Dispatch, Outbound};
    use crate::record::{Transform, Vector3};
    use serde_json::json;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_throttle_interval_follows_interest() {
        let bus = Arc::new(MockBus::new());
        bus.advertise("/scan", "sensor_msgs/LaserScan");
        let bridge = Bridge::builder(bus).build();
        let slow = ClientId::new();
        let fast = ClientId::new();

        bridge.add_interest("/scan", slow, ms(500));
        bridge.reconcile();
        assert_eq!(bridge.throttle_interval("/scan"), Some(ms(500)));

        bridge.add_interest("/scan", fast, ms(50));
        assert_eq!(bridge.throttle_interval("/scan"), Some(ms(50)));

        bridge.remove_client(fast);
        assert_eq!(bridge.throttle_interval("/scan"), Some(ms(500)));

        assert!(bridge.remove_interest("/scan", slow));
        bridge.reconcile();
        assert_eq!(bridge.subscription_kind("/scan"), None);
        assert_eq!(bridge.throttle_interval("/scan"), None);
    }

    #[test]
    fn test_stats_reflect_state() {
        let bus = Arc::new(MockBus::new());
        bus.advertise("/scan", "sensor_msgs/LaserScan");
        bus.advertise("/map", "nav_msgs/OccupancyGrid");
        let bridge = Bridge::builder(bus).build();
        bridge.add_interest("/scan", ClientId::new(), ms(100));
        bridge.add_interest("_dmesg", ClientId::new(), ms(100));
        bridge.reconcile();

        let stats = bridge.stats();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.known_topics, 2);
        assert_eq!(stats.wanted_topics, 2);
        // NoProducers: _dmesg becomes an Invalid placeholder
        assert_eq!(stats.local_subscriptions, 2);
        assert_eq!(stats.invalid_placeholders, 1);
        assert_eq!(stats.throttled_topics, 1);
        assert_eq!(bridge.subscription_kind("_dmesg"), Some(SubscriptionKind::Invalid));
    }

    #[test]
    fn test_static_transforms_used_for_base_frame() {
        let bus = Arc::new(MockBus::new());
        bus.advertise("/map", "nav_msgs/OccupancyGrid");
        let transforms = StaticTransforms::new();
        transforms.insert(
            "map",
            "husky/base_link",
            Transform {
                position: Vector3 { x: 2.0, y: 1.0, z: 0.0 },
                ..Transform::default()
            },
        );
        let gateway = DispatchGateway::new();
        let mut rx = gateway.attach_channel(16);
        let bridge = Bridge::builder(bus.clone())
            .config(BridgeConfig {
                robot_model: "Husky".to_string(),
                ..BridgeConfig::default()
            })
            .transforms(Box::new(transforms))
            .gateway(gateway)
            .build();

        bridge.add_interest("/map", ClientId::new(), ms(0));
        bridge.reconcile();
        assert!(bus.deliver("/map", BusMessage::new(json!({"data": []})).with_frame("map")));

        let mut record = None;
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Publish(Dispatch::MessageRecord(r)) = item {
                record = Some(r);
            }
        }
        let transform = record.unwrap().transform().unwrap().unwrap();
        assert_eq!(transform.position.x, 2.0);
        assert_eq!(transform.position.y, 1.0);
    }

    #[tokio::test]
    async fn test_request_reconcile_runs_off_thread() {
        let bus = Arc::new(MockBus::new());
        bus.advertise("/scan", "sensor_msgs/LaserScan");
        let bridge = Bridge::builder(bus).build();
        bridge.add_interest("/scan", ClientId::new(), ms(100));

        let report = bridge.request_reconcile().await.unwrap();
        assert_eq!(report.subscribed, vec!["/scan".to_string()]);
        assert_eq!(bridge.local_topics(), vec!["/scan".to_string()]);
    }

    async fn wait_for_passes(bridge: &Bridge, passes: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.stats().passes < passes {
                tokio::time::sleep(ms(5)).await;
            }
        })
        .await
        .expect("reconcile pass never ran");
    }

    #[tokio::test]
    async fn test_schedule_reconcile_coalesces_requests() {
        let bus = Arc::new(MockBus::new());
        bus.advertise("/scan", "sensor_msgs/LaserScan");
        let gateway = DispatchGateway::new();
        let mut rx = gateway.attach_channel(64);
        let bridge = Bridge::builder(bus).gateway(gateway).build();
        bridge.add_interest("/scan", ClientId::new(), ms(100));

        // Hold the state so the first queued pass cannot start
        let guard = bridge.inner.state.lock();
        assert!(bridge.schedule_reconcile());
        for _ in 0..9 {
            assert!(!bridge.schedule_reconcile());
        }
        drop(guard);

        wait_for_passes(&bridge, 1).await;
        tokio::time::sleep(ms(50)).await;
        assert_eq!(bridge.stats().passes, 1);
        assert_eq!(bridge.local_topics(), vec!["/scan".to_string()]);

        let mut catalogs = 0;
        while let Ok(item) = rx.try_recv() {
            if matches!(item, Outbound::Publish(Dispatch::TopicCatalog(_))) {
                catalogs += 1;
            }
        }
        assert_eq!(catalogs, 1);

        assert!(bridge.schedule_reconcile());
        wait_for_passes(&bridge, 2).await;
    }
}
