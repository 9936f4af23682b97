//! Filament scheme - the workflow graph model
//!
//! This crate defines the hierarchical node/link/annotation graph of a
//! dataflow workflow and its structural invariants:
//!
//! - Typed channel descriptors with strict and dynamic compatibility
//! - Leaf nodes, nested meta-node containers, and boundary bridge nodes
//! - Transactional, validated graph mutation (acyclicity, duplicate and
//!   single-connection constraints) with cascading removal
//! - Structural event notification for external observers
//!
//! Execution semantics live in the companion `signal-engine` crate; this
//! crate is purely the model.
//!
//! # Example
//!
//! ```
//! use filament_scheme::{Scheme, Node, NodeDescription, InputChannel, OutputChannel, Link};
//!
//! let mut scheme = Scheme::new("Example");
//! let source = scheme
//!     .add_node(Node::new(
//!         NodeDescription::new("example.Source", "Source")
//!             .with_outputs(vec![OutputChannel::new("out", "Out", &["int"])]),
//!     ))
//!     .unwrap();
//! let sink = scheme
//!     .add_node(Node::new(
//!         NodeDescription::new("example.Sink", "Sink")
//!             .with_inputs(vec![InputChannel::new("in", "In", &["number"])]),
//!     ))
//!     .unwrap();
//! scheme.new_link(source, "out", sink, "in").unwrap();
//! ```

pub mod annotation;
pub mod builder;
pub mod channel;
pub mod errors;
pub mod events;
pub mod link;
pub mod node;
pub mod registry;
pub mod scheme;
pub mod types;
pub mod validation;

// Re-export key types
pub use annotation::{Annotation, AnnotationKind};
pub use builder::SchemeBuilder;
pub use channel::{classify_connection, compatible_channels, Compatibility, InputChannel, OutputChannel};
pub use errors::{Result, SchemeError};
pub use events::{EventSink, NullEventSink, SchemeEvent, VecEventSink};
pub use link::Link;
pub use node::{MetaNode, Node, NodeDescription, NodeKind};
pub use registry::{TypeDescriptor, TypeRegistry};
pub use scheme::Scheme;
pub use types::{
    AnnotationId, ChannelId, LinkId, LinkState, LoopPolicy, NodeId, NodeState, Position,
};
pub use validation::{check_connect, creates_cycle};
