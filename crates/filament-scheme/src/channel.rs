//! Channel descriptors and connection compatibility
//!
//! A channel is a named, typed input or output slot on a node. Descriptors
//! are immutable once created; connection validation classifies a
//! (source, sink) pair as strictly compatible, dynamically compatible
//! (checked per-value at delivery time) or incompatible.

use serde::{Deserialize, Serialize};

use crate::registry::TypeRegistry;
use crate::types::ChannelId;

/// An input slot on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputChannel {
    /// Channel identifier, unique among the node's inputs
    pub id: ChannelId,
    /// Human-readable name
    pub name: String,
    /// Accepted value type ids, in declaration order
    pub types: Vec<String>,
    /// At most one link may target this channel
    #[serde(default)]
    pub single: bool,
    /// Relax the static type check to a per-value runtime check
    #[serde(default)]
    pub dynamic: bool,
    /// Legacy ids this channel replaces (consulted by channel lookup)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

/// An output slot on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputChannel {
    /// Channel identifier, unique among the node's outputs
    pub id: ChannelId,
    /// Human-readable name
    pub name: String,
    /// Produced value type ids, in declaration order
    pub types: Vec<String>,
    /// At most one link may originate from this channel
    #[serde(default)]
    pub single: bool,
    /// The concrete produced type varies at runtime
    #[serde(default)]
    pub dynamic: bool,
    /// Legacy ids this channel replaces (consulted by channel lookup)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
}

impl InputChannel {
    /// Create an input channel descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>, types: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            types: types.iter().map(|t| t.to_string()).collect(),
            single: false,
            dynamic: false,
            replaces: Vec::new(),
        }
    }

    /// Restrict this channel to a single incoming link
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Mark this channel dynamic
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Declare legacy ids this channel replaces
    pub fn replaces(mut self, ids: &[&str]) -> Self {
        self.replaces = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether `id` names this channel, directly or via a legacy id
    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.replaces.iter().any(|r| r == id)
    }
}

impl OutputChannel {
    /// Create an output channel descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>, types: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            types: types.iter().map(|t| t.to_string()).collect(),
            single: false,
            dynamic: false,
            replaces: Vec::new(),
        }
    }

    /// Restrict this channel to a single outgoing link
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Mark this channel dynamic
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Declare legacy ids this channel replaces
    pub fn replaces(mut self, ids: &[&str]) -> Self {
        self.replaces = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether `id` names this channel, directly or via a legacy id
    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.replaces.iter().any(|r| r == id)
    }
}

/// Boundary bridges mirror descriptors across a meta-node boundary.
impl From<&InputChannel> for OutputChannel {
    fn from(channel: &InputChannel) -> Self {
        OutputChannel {
            id: channel.id.clone(),
            name: channel.name.clone(),
            types: channel.types.clone(),
            single: channel.single,
            dynamic: channel.dynamic,
            replaces: channel.replaces.clone(),
        }
    }
}

impl From<&OutputChannel> for InputChannel {
    fn from(channel: &OutputChannel) -> Self {
        InputChannel {
            id: channel.id.clone(),
            name: channel.name.clone(),
            types: channel.types.clone(),
            single: channel.single,
            dynamic: channel.dynamic,
            replaces: channel.replaces.clone(),
        }
    }
}

/// Classification of a (source, sink) channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    /// Every concrete source type is a subtype of some sink type
    Strict,
    /// Admitted because the source is dynamic; each delivered value is
    /// re-checked against the sink's accepted types at delivery time
    Dynamic,
    /// The channels cannot be connected
    None,
}

/// Classify a source/sink channel pair
///
/// Strict: every source type is a subtype of some sink type. Dynamic (only
/// when the source is flagged dynamic): at least one sink type is a subtype
/// of a source type. Unresolvable type ids never match.
pub fn classify_connection(
    registry: &TypeRegistry,
    source: &OutputChannel,
    sink: &InputChannel,
) -> Compatibility {
    let strict = source
        .types
        .iter()
        .all(|s| sink.types.iter().any(|t| registry.is_subtype(s, t)));
    if strict {
        return Compatibility::Strict;
    }
    if source.dynamic {
        let weak = sink
            .types
            .iter()
            .any(|t| source.types.iter().any(|s| registry.is_subtype(t, s)));
        if weak {
            return Compatibility::Dynamic;
        }
    }
    Compatibility::None
}

/// Whether a source channel can connect to a sink channel at all
pub fn compatible_channels(
    registry: &TypeRegistry,
    source: &OutputChannel,
    sink: &InputChannel,
) -> bool {
    classify_connection(registry, source, sink) != Compatibility::None
}
