//! Error types for the signal engine

use thiserror::Error;

use filament_scheme::{NodeId, SchemeError};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the signal engine
///
/// The engine surfaces no data-validation errors of its own; structural
/// failures come through from the model and host failures propagate
/// uncaught to the caller of the delivery.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structural failure from the workflow model
    #[error(transparent)]
    Scheme(#[from] SchemeError),

    /// `process_node` called while a delivery is already in flight
    #[error("process_node is not re-entrant")]
    ReentrantProcessing,

    /// The referenced node is not part of the tracked workflow
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The node has no such output channel
    #[error("node {node} has no output channel '{channel}'")]
    UnknownOutputChannel { node: NodeId, channel: String },

    /// Failure reported by the execution host's delivery hook
    #[error("execution host failure: {0}")]
    Host(String),
}

impl EngineError {
    /// Create a host failure with a message
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }
}
