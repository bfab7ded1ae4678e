//! Topic identity and classification
//!
//! A topic is either a real bus topic or a pseudo-topic: a synthetic stream
//! (kernel log, system stats, process list) whose name starts with `_`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name prefix reserved for pseudo-topics
pub const PSEUDO_PREFIX: &str = "_";

/// Known topics and their declared types, as last reported by the bus
pub type TopicCatalog = BTreeMap<String, String>;

/// A topic as reported by the bus binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl TopicInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// The fixed set of synthetic producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoKind {
    /// Kernel log tail
    KernelLog,
    /// System resource snapshot
    SystemStats,
    /// Process list snapshot
    Processes,
}

impl PseudoKind {
    pub const ALL: [PseudoKind; 3] = [PseudoKind::KernelLog, PseudoKind::SystemStats, PseudoKind::Processes];

    /// Reserved topic name clients subscribe to
    pub fn topic_name(self) -> &'static str {
        match self {
            PseudoKind::KernelLog => "_dmesg",
            PseudoKind::SystemStats => "_system_stats",
            PseudoKind::Processes => "_top",
        }
    }

    /// Type name stamped on records from this producer
    pub fn topic_type(self) -> &'static str {
        match self {
            PseudoKind::KernelLog => "rcl_interfaces/msg/Log",
            PseudoKind::SystemStats => "rosboard_msgs/msg/SystemStats",
            PseudoKind::Processes => "rosboard_msgs/msg/ProcessList",
        }
    }

    pub fn from_topic(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic_name() == name)
    }
}

impl fmt::Display for PseudoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic_name())
    }
}

/// How the synchronizer treats a topic name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Ordinary bus topic
    Real,
    /// Reserved name backed by a synthetic producer
    Pseudo(PseudoKind),
    /// Reserved prefix with no producer behind it
    UnknownPseudo,
}

/// Classify a topic name by its prefix
pub fn classify(name: &str) -> TopicKind {
    if !name.starts_with(PSEUDO_PREFIX) {
        return TopicKind::Real;
    }
    match PseudoKind::from_topic(name) {
        Some(kind) => TopicKind::Pseudo(kind),
        None => TopicKind::UnknownPseudo,
    }
}
