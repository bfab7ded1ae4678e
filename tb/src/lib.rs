//! topicbridge - on-demand bridge from a pub/sub bus to network clients
//!
//! Remote clients declare which topics they want. The bridge keeps exactly
//! the matching local bus subscriptions alive, throttles each topic to the
//! fastest rate any client asked for, converts messages into flat records,
//! attaches robot-base transforms to spatial message types, and hands the
//! results to the transport.
//!
//! # Modules
//!
//! - [`bridge`] - the [`Bridge`] context: synchronizer, pipeline, loops
//! - [`bus`] - bus binding traits and the in-memory bus
//! - [`dispatch`] - the single hand-off point to the transport
//! - [`hub`] - client hub and Unix socket server
//! - [`transform`] - transform augmentation and the static transform tree
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod bridge;
pub mod bus;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod interest;
pub mod producer;
pub mod record;
pub mod table;
pub mod throttle;
pub mod topic;
pub mod transform;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeBuilder, BridgeStats, MessagePipeline, PassReport};
pub use bus::{BusBinding, BusCallback, BusMessage, BusSubscription, JsonRecordConverter, MemoryBus, MessageSchema, RecordConverter};
pub use config::{BridgeConfig, Config, ServerConfig};
pub use dispatch::{Dispatch, DispatchGateway, Outbound, Transport};
pub use error::{BusError, ConvertError, DispatchError, ProducerError, ProtocolError, TransformError};
pub use hub::{ClientFrame, ClientHub, ServerFrame};
pub use interest::{ClientId, DesiredInterest};
pub use producer::{NoProducers, ProducerFactory, ProducerHandle, PseudoCallback, PseudoPayload};
pub use record::{OutgoingRecord, Quaternion, Transform, Vector3};
pub use table::SubscriptionKind;
pub use topic::{PseudoKind, TopicCatalog, TopicInfo, TopicKind, classify};
pub use transform::{StaticTransforms, TransformAugmenter, TransformProvider};
