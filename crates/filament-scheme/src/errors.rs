//! Error types for the workflow model
//!
//! All variants are structural-validation failures raised synchronously by
//! the mutating operation that would violate an invariant. Failed
//! operations have no side effects.

use thiserror::Error;

use crate::types::{AnnotationId, LinkId, NodeId};

/// Result type alias using SchemeError
pub type Result<T> = std::result::Result<T, SchemeError>;

/// Errors raised by workflow mutation and validation
#[derive(Debug, Error)]
pub enum SchemeError {
    /// Insertion would create a self-loop disallowed by the loop policy
    #[error("link would create a self-loop on node {0}")]
    SelfLoop(NodeId),

    /// Insertion would create a graph cycle disallowed by the loop policy
    #[error("link would create a cycle through node {0}")]
    Cycle(NodeId),

    /// Source and sink channel types fail compatibility classification
    #[error("incompatible channels: '{source_channel}' -> '{sink_channel}'")]
    IncompatibleChannels {
        source_channel: String,
        sink_channel: String,
    },

    /// An identical (source, channel) -> (sink, channel) link already exists
    #[error("duplicate link: '{source_channel}' -> '{sink_channel}' already connected")]
    DuplicateLink {
        source_channel: String,
        sink_channel: String,
    },

    /// The sink channel is single-connection and already has an incoming link
    #[error("sink channel '{sink_channel}' on node {sink_node} is single and already connected")]
    SinkChannelOccupied {
        sink_node: NodeId,
        sink_channel: String,
    },

    /// A referenced node is not present where required
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A referenced link is not present
    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    /// A referenced annotation is not present
    #[error("unknown annotation {0}")]
    UnknownAnnotation(AnnotationId),

    /// A referenced channel does not exist on the node
    #[error("node {node} has no {direction} channel '{channel}'")]
    UnknownChannel {
        node: NodeId,
        direction: &'static str,
        channel: String,
    },

    /// The entity (by id) is already part of the workflow
    #[error("entity already belongs to the workflow")]
    AlreadyInScheme,

    /// A builder referenced a node name that was never added
    #[error("unknown node name '{0}' in builder")]
    UnknownNodeName(String),

    /// Link endpoints are not children of the same container
    #[error("link endpoints are not children of the same container")]
    EndpointMismatch,

    /// The target of a container operation is not a meta node
    #[error("node {0} is not a meta node")]
    NotAMetaNode(NodeId),

    /// The root meta node cannot be removed
    #[error("the root node cannot be removed")]
    CannotRemoveRoot,

    /// Index out of bounds for an insertion
    #[error("insertion index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}
