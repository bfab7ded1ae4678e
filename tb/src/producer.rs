//! Pseudo-topic producer interface
//!
//! Producers generate synthetic data (kernel log lines, system stats,
//! process lists) and push it through a callback. They rate-limit
//! themselves; the bridge does not throttle pseudo-topics.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ProducerError;
use crate::topic::PseudoKind;

/// Data pushed by a producer
#[derive(Debug, Clone, PartialEq)]
pub enum PseudoPayload {
    /// A chunk of kernel log text
    KernelLog(String),
    /// System resource snapshot, flattened into the record
    SystemStats(Map<String, Value>),
    /// Process list snapshot
    Processes(Vec<Value>),
}

impl PseudoPayload {
    pub fn kind(&self) -> PseudoKind {
        match self {
            PseudoPayload::KernelLog(_) => PseudoKind::KernelLog,
            PseudoPayload::SystemStats(_) => PseudoKind::SystemStats,
            PseudoPayload::Processes(_) => PseudoKind::Processes,
        }
    }
}

/// Callback a producer invokes with new data
pub type PseudoCallback = Arc<dyn Fn(PseudoPayload) + Send + Sync>;

/// A running producer
pub trait ProducerHandle: Send {
    /// Stop producing. No callback runs after this returns.
    fn stop(self: Box<Self>);
}

/// Starts producers on demand
pub trait ProducerFactory: Send + Sync {
    fn start(&self, kind: PseudoKind, callback: PseudoCallback) -> Result<Box<dyn ProducerHandle>, ProducerError>;
}

/// Factory for deployments without synthetic producers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProducers;

impl ProducerFactory for NoProducers {
    fn start(&self, kind: PseudoKind, _callback: PseudoCallback) -> Result<Box<dyn ProducerHandle>, ProducerError> {
        Err(ProducerError::Unavailable(kind.topic_name().to_string()))
    }
}
