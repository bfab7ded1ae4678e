//! Error types for the bridge and its collaborators

use thiserror::Error;

/// Errors reported by a bus binding
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Could not load message type '{type_name}': {reason}")]
    UnknownType { type_name: String, reason: String },

    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Failed to unsubscribe from {topic}: {reason}")]
    Unsubscribe { topic: String, reason: String },
}

/// Errors from converting a raw bus message into a generic record
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Unsupported message layout: {0}")]
    Unsupported(String),

    #[error("Field '{field}' could not be converted: {reason}")]
    Field { field: String, reason: String },
}

/// Errors from a transform lookup
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Message has no frame id")]
    MissingFrame,

    #[error("No transform found between {source_frame} and {target_frame}")]
    NotFound { source_frame: String, target_frame: String },
}

/// Errors from starting a pseudo-topic producer
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Pseudo producer for '{0}' is not available")]
    Unavailable(String),
}

/// Errors from handing a record to the transport layer
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch sink not initialized")]
    NotReady,

    #[error("Dispatch queue full, dropping {0}")]
    QueueFull(&'static str),

    #[error("Dispatch sink closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors in the client wire protocol
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown operation '{0}'")]
    UnknownOp(String),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),
}
