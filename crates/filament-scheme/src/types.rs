//! Core identifier and state types for workflow graphs
//!
//! These types are shared by every other module: entity identifiers,
//! canvas positions, runtime state flags and the workflow loop policy.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a channel on a node (unique per node side)
pub type ChannelId = String;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh identifier
            pub fn fresh() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id! {
    /// Unique identifier of a node
    ///
    /// Stamped once at construction; all cross-references (links, events,
    /// signal routing) use the id rather than a pointer.
    NodeId
}

entity_id! {
    /// Unique identifier of a link
    LinkId
}

entity_id! {
    /// Unique identifier of an annotation
    AnnotationId
}

/// Position of a node or annotation anchor on the canvas
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Runtime state flags of a node
///
/// All flags default to clear. The flags are bookkeeping shared between the
/// editor and the signal engine; they carry no structural meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeState {
    /// The node's computation is currently in flight
    pub running: bool,
    /// The node has queued but undelivered input
    pub pending: bool,
    /// The node's outputs are known stale; hold back dependents
    pub invalidated: bool,
    /// The node is not ready to receive input
    pub not_ready: bool,
}

impl NodeState {
    /// True when no flag is set
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

/// Runtime state flags of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkState {
    /// No value has ever traversed the link
    pub empty: bool,
    /// At least one value has traversed the link
    pub active: bool,
    /// A value is queued on the link, awaiting delivery
    pub pending: bool,
    /// The source's output on this link is known stale
    pub invalidated: bool,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            empty: true,
            active: false,
            pending: false,
            invalidated: false,
        }
    }
}

/// Loop policy of a workflow
///
/// Consulted by link validation: under `NoLoops` every insertion must keep
/// the graph acyclic; `AllowSelfLoops` additionally admits links whose
/// source and sink are the same node; `AllowLoops` admits arbitrary cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPolicy {
    #[default]
    NoLoops,
    AllowLoops,
    AllowSelfLoops,
}

impl LoopPolicy {
    /// Whether a link from a node to itself is admissible
    pub fn allows_self_loops(&self) -> bool {
        matches!(self, LoopPolicy::AllowLoops | LoopPolicy::AllowSelfLoops)
    }

    /// Whether a link closing a multi-node cycle is admissible
    pub fn allows_cycles(&self) -> bool {
        matches!(self, LoopPolicy::AllowLoops)
    }
}
