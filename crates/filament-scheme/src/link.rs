//! Links: directed, typed edges between two channels on two nodes

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, LinkId, LinkState, NodeId};

/// A directed edge from an output channel to an input channel
///
/// Endpoints are referenced by node id and channel id; both nodes must be
/// children of the same container when the link is inserted. `dynamic` is
/// stamped by validation when the connection classified as dynamic, and
/// marks the link for per-value re-checking at delivery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: LinkId,
    pub source_node: NodeId,
    pub source_channel: ChannelId,
    pub sink_node: NodeId,
    pub sink_channel: ChannelId,
    /// User-controlled: disabled links never propagate values
    pub enabled: bool,
    /// Runtime-checked connection (set by validation, not by callers)
    #[serde(default)]
    pub dynamic: bool,
    /// Runtime state flags, owned by the signal engine
    #[serde(default)]
    pub state: LinkState,
}

impl Link {
    /// Create a link between two channels; enabled by default
    pub fn new(
        source_node: NodeId,
        source_channel: impl Into<String>,
        sink_node: NodeId,
        sink_channel: impl Into<String>,
    ) -> Self {
        Self {
            id: LinkId::fresh(),
            source_node,
            source_channel: source_channel.into(),
            sink_node,
            sink_channel: sink_channel.into(),
            enabled: true,
            dynamic: false,
            state: LinkState::default(),
        }
    }

    /// Disable the link at construction
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this link and `other` connect the same channel pair
    pub fn same_connection(&self, other: &Link) -> bool {
        self.source_node == other.source_node
            && self.source_channel == other.source_channel
            && self.sink_node == other.sink_node
            && self.sink_channel == other.sink_channel
    }

    /// Whether the link touches `node` on either end
    pub fn touches(&self, node: NodeId) -> bool {
        self.source_node == node || self.sink_node == node
    }
}
