//! Dispatch gateway: the single hand-off point to the transport layer
//!
//! Producers of outbound data (bus callback threads, the reconciliation
//! pass, the liveness loop) call [`DispatchGateway::publish`] without
//! blocking. A pump task drains the queue and awaits the transport.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::record::OutgoingRecord;
use crate::topic::TopicCatalog;

/// Payload kinds the transport knows how to broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// topic name -> type name for every known topic
    TopicCatalog(TopicCatalog),
    /// A finished message or diagnostic record
    MessageRecord(OutgoingRecord),
}

impl Dispatch {
    pub fn label(&self) -> &'static str {
        match self {
            Dispatch::TopicCatalog(_) => "topic catalog",
            Dispatch::MessageRecord(_) => "message record",
        }
    }
}

/// Items queued for the pump task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Publish(Dispatch),
    LivenessProbe,
}

impl Outbound {
    fn label(&self) -> &'static str {
        match self {
            Outbound::Publish(d) => d.label(),
            Outbound::LivenessProbe => "liveness probe",
        }
    }
}

/// The network side of the bridge
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver to every client that should receive this payload
    async fn broadcast(&self, dispatch: Dispatch) -> Result<(), DispatchError>;

    /// Send a liveness probe to every connected client
    async fn send_liveness_probe(&self) -> Result<(), DispatchError>;
}

/// Cloneable handle to the outbound queue; unattached until a transport
/// (or a test channel) is plugged in
#[derive(Clone, Default)]
pub struct DispatchGateway {
    sink: Arc<RwLock<Option<mpsc::Sender<Outbound>>>>,
}

impl DispatchGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bare channel and return its receiving end
    pub fn attach_channel(&self, buffer: usize) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Attach a transport and spawn the pump task that feeds it
    pub fn attach(&self, transport: Arc<dyn Transport>, buffer: usize) -> JoinHandle<()> {
        let mut rx = self.attach_channel(buffer);
        info!(buffer, "Dispatch gateway attached");

        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let label = outbound.label();
                let result = match outbound {
                    Outbound::Publish(dispatch) => transport.broadcast(dispatch).await,
                    Outbound::LivenessProbe => transport.send_liveness_probe().await,
                };
                if let Err(e) = result {
                    warn!(kind = label, error = %e, "Transport failed to deliver");
                }
            }
            debug!("Dispatch pump stopped");
        })
    }

    /// Drop the sink; the pump exits once the queue drains
    pub fn detach(&self) {
        self.sink.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_ready(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn enqueue(&self, outbound: Outbound) -> Result<(), DispatchError> {
        let guard = self.sink.read().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(DispatchError::NotReady)?;
        tx.try_send(outbound).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) => DispatchError::QueueFull(item.label()),
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    pub fn publish(&self, dispatch: Dispatch) -> Result<(), DispatchError> {
        self.enqueue(Outbound::Publish(dispatch))
    }

    pub fn publish_catalog(&self, catalog: TopicCatalog) -> Result<(), DispatchError> {
        self.publish(Dispatch::TopicCatalog(catalog))
    }

    pub fn publish_record(&self, record: OutgoingRecord) -> Result<(), DispatchError> {
        self.publish(Dispatch::MessageRecord(record))
    }

    pub fn request_liveness_probe(&self) -> Result<(), DispatchError> {
        self.enqueue(Outbound::LivenessProbe)
    }
}

#[cfg(test)]
pub mod mock {
    //! Transport that records everything it is asked to send

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<Outbound>>,
        pub fail: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Outbound> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn broadcast(&self, dispatch: Dispatch) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(Outbound::Publish(dispatch));
            if self.fail {
                return Err(DispatchError::Transport("mock failure".to_string()));
            }
            Ok(())
        }

        async fn send_liveness_probe(&self) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(Outbound::LivenessProbe);
            if self.fail {
                return Err(DispatchError::Transport("mock failure".to_string()));
            }
            Ok(())
        }
    }
}
