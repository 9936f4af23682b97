//! Structural event types and the observer seam
//!
//! Every mutating workflow operation emits a typed event after the
//! mutation commits. Delivery is synchronous and ordered: events reach
//! every registered sink in registration order, and events of one
//! operation are fully delivered before the next operation can begin
//! (mutation requires `&mut Scheme`). External observers — editors, the
//! signal engine's host — subscribe to these rather than polling.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{AnnotationId, ChannelId, LinkId, LinkState, NodeId, NodeState, Position};

/// Trait for receiving workflow structural events
///
/// This abstracts over the consumer (editor view, event recorder, test
/// harness). Sinks must tolerate events for entities they have not seen.
pub trait EventSink: Send + Sync {
    fn send(&self, event: &SchemeEvent);
}

/// Events emitted by workflow mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchemeEvent {
    #[serde(rename_all = "camelCase")]
    NodeAdded { node: NodeId, parent: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeRemoved { node: NodeId, parent: NodeId },

    #[serde(rename_all = "camelCase")]
    LinkAdded {
        link: LinkId,
        parent: NodeId,
        source_node: NodeId,
        source_channel: ChannelId,
        sink_node: NodeId,
        sink_channel: ChannelId,
        enabled: bool,
    },

    #[serde(rename_all = "camelCase")]
    LinkRemoved {
        link: LinkId,
        parent: NodeId,
        source_node: NodeId,
        source_channel: ChannelId,
        sink_node: NodeId,
        sink_channel: ChannelId,
    },

    #[serde(rename_all = "camelCase")]
    AnnotationAdded { annotation: AnnotationId, parent: NodeId },

    #[serde(rename_all = "camelCase")]
    AnnotationRemoved { annotation: AnnotationId, parent: NodeId },

    /// A meta node's boundary channel projection grew
    #[serde(rename_all = "camelCase")]
    ChannelAdded { node: NodeId, channel: ChannelId },

    /// A meta node's boundary channel projection shrank
    #[serde(rename_all = "camelCase")]
    ChannelRemoved { node: NodeId, channel: ChannelId },

    #[serde(rename_all = "camelCase")]
    NodeMoved { node: NodeId, position: Position },

    #[serde(rename_all = "camelCase")]
    NodeRetitled { node: NodeId, title: String },

    #[serde(rename_all = "camelCase")]
    NodeProgressChanged { node: NodeId, progress: f64 },

    #[serde(rename_all = "camelCase")]
    NodeStateChanged { node: NodeId, state: NodeState },

    #[serde(rename_all = "camelCase")]
    NodeStatusChanged { node: NodeId, message: String },

    #[serde(rename_all = "camelCase")]
    LinkEnabledChanged { link: LinkId, enabled: bool },

    #[serde(rename_all = "camelCase")]
    LinkStateChanged { link: LinkId, state: LinkState },

    #[serde(rename_all = "camelCase")]
    RuntimeEnvChanged { key: String },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: &SchemeEvent) {}
}

/// A vector-based event sink that collects events
///
/// Useful for testing, and as the staging buffer a host drains to feed
/// the signal engine's `handle_event`.
pub struct VecEventSink {
    events: Mutex<Vec<SchemeEvent>>,
}

impl VecEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<SchemeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Remove and return all collected events
    pub fn drain(&self) -> Vec<SchemeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &SchemeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
