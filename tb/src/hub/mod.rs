//! Client hub: the transport side of the bridge
//!
//! Tracks connected clients, forwards their subscribe/unsubscribe requests
//! to the [`Bridge`], and fans dispatched payloads out to the clients that
//! want them at each client's own rate.

pub mod messages;
pub mod server;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::dispatch::{Dispatch, Transport};
use crate::error::DispatchError;
use crate::interest::ClientId;
use crate::record::OutgoingRecord;
use crate::throttle::ThrottleState;

pub use messages::{ClientFrame, ServerFrame};

struct PendingPing {
    seq: u64,
    sent_ms: f64,
}

struct ClientEntry {
    tx: mpsc::Sender<ServerFrame>,
    /// topic -> per-client throttle
    topics: HashMap<String, ThrottleState>,
    next_seq: u64,
    last_ping: Option<PendingPing>,
}

impl ClientEntry {
    fn send(&self, client: ClientId, frame: ServerFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(%client, op = frame.op(), "Client queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%client, "Client channel closed");
                false
            }
        }
    }
}

pub struct ClientHub {
    bridge: Bridge,
    server: ServerConfig,
    epsilon: Duration,
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
}

fn now_ms() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1000.0
}

impl ClientHub {
    pub fn new(bridge: Bridge, server: ServerConfig) -> Self {
        let epsilon = bridge.config().throttle_epsilon();
        Self {
            bridge,
            server,
            epsilon,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Register a client; it receives the current catalog right away
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<ServerFrame>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.server.client_buffer.max(1));
        let entry = ClientEntry {
            tx,
            topics: HashMap::new(),
            next_seq: 0,
            last_ping: None,
        };
        entry.send(id, ServerFrame::Topics(self.bridge.catalog()));
        self.lock().insert(id, entry);
        info!(client = %id, "Client connected");
        (id, rx)
    }

    /// Forget a client and every interest it held
    pub fn disconnect(&self, client: ClientId) {
        let removed = self.lock().remove(&client).is_some();
        if removed {
            let topics = self.bridge.remove_client(client);
            info!(%client, topics = topics.len(), "Client disconnected");
        }
    }

    /// Apply one client request
    pub fn handle(&self, client: ClientId, frame: ClientFrame) {
        match frame {
            ClientFrame::Subscribe { topic, max_update_rate } => self.subscribe(client, &topic, max_update_rate),
            ClientFrame::Unsubscribe { topic } => self.unsubscribe(client, &topic),
            ClientFrame::Pong { seq, pong_time_ms } => self.pong(client, seq, pong_time_ms),
        }
    }

    fn subscribe(&self, client: ClientId, topic: &str, rate: Option<f64>) {
        let interval = self.server.interval_for_rate(rate);
        {
            let mut clients = self.lock();
            let Some(entry) = clients.get_mut(&client) else {
                debug!(%client, %topic, "Subscribe from unknown client ignored");
                return;
            };
            entry.topics.insert(topic.to_string(), ThrottleState::new(interval));
        }
        info!(%client, %topic, ?interval, "Client subscribed");
        self.bridge.add_interest(topic, client, interval);
        self.bridge.schedule_reconcile();
    }

    fn unsubscribe(&self, client: ClientId, topic: &str) {
        let had = self
            .lock()
            .get_mut(&client)
            .is_some_and(|entry| entry.topics.remove(topic).is_some());
        if had {
            info!(%client, %topic, "Client unsubscribed");
        }
        self.bridge.remove_interest(topic, client);
    }

    fn pong(&self, client: ClientId, seq: u64, pong_time_ms: f64) {
        let received_ms = now_ms();
        let clients = self.lock();
        let Some(entry) = clients.get(&client) else {
            return;
        };
        match &entry.last_ping {
            Some(ping) if ping.seq == seq => {
                let latency_ms = (received_ms - ping.sent_ms) / 2.0;
                let clock_diff_ms = pong_time_ms + latency_ms - received_ms;
                debug!(%client, seq, latency_ms, clock_diff_ms, "Pong received");
                entry.send(
                    client,
                    ServerFrame::Latency {
                        seq,
                        latency_ms,
                        clock_diff_ms,
                    },
                );
            }
            _ => debug!(%client, seq, "Stale pong ignored"),
        }
    }

    fn fan_out_record(&self, record: OutgoingRecord) {
        let Some(topic) = record.topic_name().map(str::to_string) else {
            warn!("Record without topic name dropped");
            return;
        };
        let now = Instant::now();
        let mut clients = self.lock();
        for (id, entry) in clients.iter_mut() {
            let Some(throttle) = entry.topics.get_mut(&topic) else {
                continue;
            };
            // Diagnostics always go through; they are emitted once per placeholder
            if !record.is_diagnostic() {
                if !throttle.admits(now, self.epsilon) {
                    continue;
                }
                throttle.reserve(now);
            }
            entry.send(*id, ServerFrame::Message(record.clone()));
        }
    }
}

#[async_trait]
impl Transport for ClientHub {
    async fn broadcast(&self, dispatch: Dispatch) -> Result<(), DispatchError> {
        match dispatch {
            Dispatch::TopicCatalog(catalog) => {
                let clients = self.lock();
                for (id, entry) in clients.iter() {
                    entry.send(*id, ServerFrame::Topics(catalog.clone()));
                }
            }
            Dispatch::MessageRecord(record) => self.fan_out_record(record),
        }
        Ok(())
    }

    async fn send_liveness_probe(&self) -> Result<(), DispatchError> {
        let sent_ms = now_ms();
        let mut clients = self.lock();
        for (id, entry) in clients.iter_mut() {
            let seq = entry.next_seq;
            entry.next_seq += 1;
            entry.last_ping = Some(PendingPing { seq, sent_ms });
            entry.send(*id, ServerFrame::Ping { seq, time_ms: sent_ms });
        }
        Ok(())
    }
}
