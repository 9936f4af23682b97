//! The workflow: a root container plus orchestration and queries
//!
//! [`Scheme`] owns exactly one root [`MetaNode`], created at construction
//! and never replaced. All graph content lives under it, possibly nested
//! inside child meta nodes. Every mutating operation validates first,
//! commits, then emits structural events to the registered sinks — a
//! failed operation has zero side effects.
//!
//! Graph-wide dependency queries treat meta-node boundaries as
//! transparent: a link ending at a meta node's boundary channel continues
//! to the matching input bridge inside it, and symmetrically for outputs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::annotation::Annotation;
use crate::channel::{Compatibility, InputChannel, OutputChannel};
use crate::errors::{Result, SchemeError};
use crate::events::{EventSink, SchemeEvent};
use crate::link::Link;
use crate::node::{AllAnnotations, AllLinks, AllNodes, MetaNode, Node};
use crate::registry::TypeRegistry;
use crate::types::{
    AnnotationId, LinkId, LinkState, LoopPolicy, NodeId, NodeState, Position,
};
use crate::validation;

/// A workflow: the top-level container for nodes, links and annotations
pub struct Scheme {
    pub title: String,
    pub description: String,
    root_id: NodeId,
    root: MetaNode,
    loop_policy: LoopPolicy,
    runtime_env: HashMap<String, Value>,
    registry: TypeRegistry,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl fmt::Debug for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheme")
            .field("title", &self.title)
            .field("loop_policy", &self.loop_policy)
            .field("nodes", &self.all_nodes().count())
            .field("links", &self.all_links().count())
            .finish()
    }
}

impl Scheme {
    /// Create an empty workflow with the builtin type registry and the
    /// default (no-loops) policy
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            root_id: NodeId::fresh(),
            root: MetaNode::default(),
            loop_policy: LoopPolicy::default(),
            runtime_env: HashMap::new(),
            registry: TypeRegistry::with_builtins(),
            sinks: Vec::new(),
        }
    }

    /// Set the description at construction
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the loop policy at construction
    pub fn with_loop_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = policy;
        self
    }

    /// Replace the type registry at construction
    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a structural event sink
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        self.loop_policy
    }

    pub fn type_registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn type_registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Identifier of the root container (used as `parent` in events)
    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// The root container
    pub fn root(&self) -> &MetaNode {
        &self.root
    }

    // -- event delivery ----------------------------------------------------

    fn emit(&self, event: SchemeEvent) {
        for sink in &self.sinks {
            sink.send(&event);
        }
    }

    fn emit_all(&self, events: Vec<SchemeEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // -- container lookup --------------------------------------------------

    fn container_ref(&self, meta: NodeId) -> Result<&MetaNode> {
        if meta == self.root_id {
            return Ok(&self.root);
        }
        let node = self
            .root
            .find_node_deep(meta)
            .ok_or(SchemeError::UnknownNode(meta))?;
        node.contents().ok_or(SchemeError::NotAMetaNode(meta))
    }

    fn container_mut(&mut self, meta: NodeId) -> Result<&mut MetaNode> {
        if meta == self.root_id {
            return Ok(&mut self.root);
        }
        let node = self
            .root
            .find_node_deep_mut(meta)
            .ok_or(SchemeError::UnknownNode(meta))?;
        node.contents_mut().ok_or(SchemeError::NotAMetaNode(meta))
    }

    /// The id of the container holding `id` as a direct child
    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        let path = self.root.container_of(id)?;
        Some(path.last().copied().unwrap_or(self.root_id))
    }

    /// The id of the container holding link `id`
    pub fn link_parent_of(&self, id: LinkId) -> Option<NodeId> {
        let path = self.root.container_of_link(id)?;
        Some(path.last().copied().unwrap_or(self.root_id))
    }

    // -- node queries ------------------------------------------------------

    /// Find a node anywhere in the workflow
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.root.find_node_deep(id)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.root.find_node_deep_mut(id)
    }

    /// Find a link anywhere in the workflow
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.all_links().find(|l| l.id == id)
    }

    fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        let path = self.root.container_of_link(id)?;
        self.root.descend_mut(&path)?.link_mut(id)
    }

    /// Find an annotation anywhere in the workflow
    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.all_annotations().find(|a| a.id == id)
    }

    /// All nodes of the workflow, depth-first (fresh traversal per call)
    pub fn all_nodes(&self) -> AllNodes<'_> {
        self.root.all_nodes()
    }

    /// All links of the workflow, depth-first (fresh traversal per call)
    pub fn all_links(&self) -> AllLinks<'_> {
        self.root.all_links()
    }

    /// All annotations of the workflow, depth-first
    pub fn all_annotations(&self) -> AllAnnotations<'_> {
        self.root.all_annotations()
    }

    /// Filter links across the whole workflow; `None` matches all
    pub fn find_links(
        &self,
        source_node: Option<NodeId>,
        source_channel: Option<&str>,
        sink_node: Option<NodeId>,
        sink_channel: Option<&str>,
    ) -> Vec<&Link> {
        self.all_links()
            .filter(|l| {
                source_node.map_or(true, |n| l.source_node == n)
                    && source_channel.map_or(true, |c| l.source_channel == c)
                    && sink_node.map_or(true, |n| l.sink_node == n)
                    && sink_channel.map_or(true, |c| l.sink_channel == c)
            })
            .collect()
    }

    // -- structural mutation: nodes ----------------------------------------

    fn contains_node(&self, id: NodeId) -> bool {
        id == self.root_id || self.root.find_node_deep(id).is_some()
    }

    /// Append a node to the root container
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let index = self.root.nodes().len();
        let root = self.root_id;
        self.insert_node(root, index, node)
    }

    /// Append a node to a meta-node container
    pub fn add_node_to(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        let index = self.container_ref(parent)?.nodes().len();
        self.insert_node(parent, index, node)
    }

    /// Insert a node at `index` in a container
    ///
    /// Fails if any node id of the inserted subtree is already part of the
    /// workflow. Inserting an input/output bridge grows the container's
    /// boundary channel projection.
    pub fn insert_node(&mut self, parent: NodeId, index: usize, node: Node) -> Result<NodeId> {
        let mut subtree = vec![node.id];
        if let Some(contents) = node.contents() {
            subtree.extend(contents.all_nodes().map(|n| n.id));
        }
        if subtree.iter().any(|id| self.contains_node(*id)) {
            return Err(SchemeError::AlreadyInScheme);
        }

        let len = self.container_ref(parent)?.nodes().len();
        if index > len {
            return Err(SchemeError::IndexOutOfBounds { index, len });
        }

        let node_id = node.id;
        let bridge = node.bridge_channel().cloned();
        self.container_mut(parent)?.insert_node_at(index, node);

        let mut events = vec![SchemeEvent::NodeAdded {
            node: node_id,
            parent,
        }];
        if let Some(channel) = bridge {
            events.push(SchemeEvent::ChannelAdded {
                node: parent,
                channel,
            });
        }
        self.emit_all(events);
        Ok(node_id)
    }

    /// Remove a node, cascading
    ///
    /// Order: a meta node's subgraph is cleared first; then every link
    /// touching the node in its container is removed; then, for a boundary
    /// bridge, the corresponding channel and any links using it in the
    /// parent scope; finally the node is detached.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        if id == self.root_id {
            return Err(SchemeError::CannotRemoveRoot);
        }
        let path = self
            .root
            .container_of(id)
            .ok_or(SchemeError::UnknownNode(id))?;
        let parent = path.last().copied().unwrap_or(self.root_id);

        if self.node(id).map_or(false, |n| n.is_meta()) {
            self.clear_container(id)?;
        }

        let mut events = Vec::new();

        // Links touching the node, both directions, in its own container.
        {
            let container = self
                .root
                .descend_mut(&path)
                .ok_or(SchemeError::UnknownNode(id))?;
            let touching: Vec<LinkId> = container
                .links()
                .iter()
                .filter(|l| l.touches(id))
                .map(|l| l.id)
                .collect();
            for link_id in touching {
                if let Some(link) = container.take_link(link_id) {
                    events.push(SchemeEvent::LinkRemoved {
                        link: link.id,
                        parent,
                        source_node: link.source_node,
                        source_channel: link.source_channel,
                        sink_node: link.sink_node,
                        sink_channel: link.sink_channel,
                    });
                }
            }
        }

        // Boundary bridge: drop the projected channel and any links using
        // it on the parent meta node in the enclosing scope.
        let bridge = self.node(id).and_then(|n| n.bridge_channel().cloned());
        if let Some(channel) = bridge {
            if let Some((_, grandparent_path)) = path.split_last() {
                let grandparent = grandparent_path.last().copied().unwrap_or(self.root_id);
                let scope = self
                    .root
                    .descend_mut(grandparent_path)
                    .ok_or(SchemeError::UnknownNode(id))?;
                let using: Vec<LinkId> = scope
                    .links()
                    .iter()
                    .filter(|l| {
                        (l.source_node == parent && l.source_channel == channel)
                            || (l.sink_node == parent && l.sink_channel == channel)
                    })
                    .map(|l| l.id)
                    .collect();
                for link_id in using {
                    if let Some(link) = scope.take_link(link_id) {
                        events.push(SchemeEvent::LinkRemoved {
                            link: link.id,
                            parent: grandparent,
                            source_node: link.source_node,
                            source_channel: link.source_channel,
                            sink_node: link.sink_node,
                            sink_channel: link.sink_channel,
                        });
                    }
                }
            }
            events.push(SchemeEvent::ChannelRemoved {
                node: parent,
                channel,
            });
        }

        let container = self
            .root
            .descend_mut(&path)
            .ok_or(SchemeError::UnknownNode(id))?;
        let node = container.take_node(id).ok_or(SchemeError::UnknownNode(id))?;
        events.push(SchemeEvent::NodeRemoved { node: id, parent });
        self.emit_all(events);
        Ok(node)
    }

    /// Create, title and insert an input bridge into a meta node
    ///
    /// As a side effect the meta node's input channel projection grows.
    pub fn create_input_node(&mut self, meta: NodeId, channel: InputChannel) -> Result<NodeId> {
        self.container_ref(meta)?;
        self.add_node_to(meta, Node::input(channel))
    }

    /// Create, title and insert an output bridge into a meta node
    pub fn create_output_node(&mut self, meta: NodeId, channel: OutputChannel) -> Result<NodeId> {
        self.container_ref(meta)?;
        self.add_node_to(meta, Node::output(channel))
    }

    /// Remove the entire workflow content
    pub fn clear(&mut self) -> Result<()> {
        let root = self.root_id;
        self.clear_container(root)
    }

    /// Empty a container by repeatedly removing terminal nodes
    ///
    /// Terminal-first ordering guarantees links are removed before the
    /// nodes they reference; nested meta nodes are cleared on the way.
    /// When a loop policy has admitted cycles there may be no terminal
    /// node left, in which case removal falls back to an arbitrary node
    /// (its links are still removed first by the cascade).
    fn clear_container(&mut self, meta: NodeId) -> Result<()> {
        let annotations: Vec<AnnotationId> = self
            .container_ref(meta)?
            .annotations()
            .iter()
            .map(|a| a.id)
            .collect();
        for annotation in annotations {
            self.remove_annotation(annotation)?;
        }

        loop {
            let container = self.container_ref(meta)?;
            if container.nodes().is_empty() {
                return Ok(());
            }
            let terminal: Vec<NodeId> = container
                .nodes()
                .iter()
                .filter(|n| !container.links().iter().any(|l| l.source_node == n.id))
                .map(|n| n.id)
                .collect();
            if terminal.is_empty() {
                let first = container.nodes()[0].id;
                self.remove_node(first)?;
            } else {
                for id in terminal {
                    self.remove_node(id)?;
                }
            }
        }
    }

    // -- structural mutation: links ----------------------------------------

    /// Construct and insert a link between two channels
    pub fn new_link(
        &mut self,
        source_node: NodeId,
        source_channel: &str,
        sink_node: NodeId,
        sink_channel: &str,
    ) -> Result<LinkId> {
        self.add_link(Link::new(source_node, source_channel, sink_node, sink_channel))
    }

    /// Insert a link, inferring the container from its endpoints
    pub fn add_link(&mut self, link: Link) -> Result<LinkId> {
        let source_parent = self
            .parent_of(link.source_node)
            .ok_or(SchemeError::UnknownNode(link.source_node))?;
        let sink_parent = self
            .parent_of(link.sink_node)
            .ok_or(SchemeError::UnknownNode(link.sink_node))?;
        if source_parent != sink_parent {
            return Err(SchemeError::EndpointMismatch);
        }
        let index = self.container_ref(source_parent)?.links().len();
        self.insert_link(source_parent, index, link)
    }

    /// Insert a link at `index` in a container, validating first
    ///
    /// Validation is delegated to [`validation::check_connect`] with this
    /// workflow's loop policy; the connection classification stamps the
    /// link's `dynamic` flag and its runtime state is reset.
    pub fn insert_link(&mut self, parent: NodeId, index: usize, mut link: Link) -> Result<LinkId> {
        if self.link(link.id).is_some() {
            return Err(SchemeError::AlreadyInScheme);
        }
        let container = self.container_ref(parent)?;
        let len = container.links().len();
        if index > len {
            return Err(SchemeError::IndexOutOfBounds { index, len });
        }
        let compatibility =
            validation::check_connect(container, &link, &self.registry, self.loop_policy)?;
        link.dynamic = compatibility == Compatibility::Dynamic;
        link.state = LinkState::default();

        // Canonicalize legacy channel ids so downstream consumers can
        // compare ids directly.
        if let Some(channel) = container
            .node(link.source_node)
            .and_then(|n| n.output_channel(&link.source_channel))
        {
            link.source_channel = channel.id;
        }
        if let Some(channel) = container
            .node(link.sink_node)
            .and_then(|n| n.input_channel(&link.sink_channel))
        {
            link.sink_channel = channel.id;
        }

        let event = SchemeEvent::LinkAdded {
            link: link.id,
            parent,
            source_node: link.source_node,
            source_channel: link.source_channel.clone(),
            sink_node: link.sink_node,
            sink_channel: link.sink_channel.clone(),
            enabled: link.enabled,
        };
        let link_id = link.id;
        self.container_mut(parent)?.insert_link_at(index, link);
        self.emit(event);
        Ok(link_id)
    }

    /// Remove a link
    pub fn remove_link(&mut self, id: LinkId) -> Result<Link> {
        let path = self
            .root
            .container_of_link(id)
            .ok_or(SchemeError::UnknownLink(id))?;
        let parent = path.last().copied().unwrap_or(self.root_id);
        let container = self
            .root
            .descend_mut(&path)
            .ok_or(SchemeError::UnknownLink(id))?;
        let link = container.take_link(id).ok_or(SchemeError::UnknownLink(id))?;
        self.emit(SchemeEvent::LinkRemoved {
            link: link.id,
            parent,
            source_node: link.source_node,
            source_channel: link.source_channel.clone(),
            sink_node: link.sink_node,
            sink_channel: link.sink_channel.clone(),
        });
        Ok(link)
    }

    // -- structural mutation: annotations ----------------------------------

    /// Append an annotation to the root container
    pub fn add_annotation(&mut self, annotation: Annotation) -> Result<AnnotationId> {
        let index = self.root.annotations().len();
        let root = self.root_id;
        self.insert_annotation(root, index, annotation)
    }

    /// Append an annotation to a meta-node container
    pub fn add_annotation_to(
        &mut self,
        parent: NodeId,
        annotation: Annotation,
    ) -> Result<AnnotationId> {
        let index = self.container_ref(parent)?.annotations().len();
        self.insert_annotation(parent, index, annotation)
    }

    /// Insert an annotation at `index` in a container
    pub fn insert_annotation(
        &mut self,
        parent: NodeId,
        index: usize,
        annotation: Annotation,
    ) -> Result<AnnotationId> {
        if self.annotation(annotation.id).is_some() {
            return Err(SchemeError::AlreadyInScheme);
        }
        let len = self.container_ref(parent)?.annotations().len();
        if index > len {
            return Err(SchemeError::IndexOutOfBounds { index, len });
        }
        let annotation_id = annotation.id;
        self.container_mut(parent)?.insert_annotation_at(index, annotation);
        self.emit(SchemeEvent::AnnotationAdded {
            annotation: annotation_id,
            parent,
        });
        Ok(annotation_id)
    }

    /// Remove an annotation
    pub fn remove_annotation(&mut self, id: AnnotationId) -> Result<Annotation> {
        let path = self
            .root
            .container_of_annotation(id)
            .ok_or(SchemeError::UnknownAnnotation(id))?;
        let parent = path.last().copied().unwrap_or(self.root_id);
        let container = self
            .root
            .descend_mut(&path)
            .ok_or(SchemeError::UnknownAnnotation(id))?;
        let annotation = container
            .take_annotation(id)
            .ok_or(SchemeError::UnknownAnnotation(id))?;
        self.emit(SchemeEvent::AnnotationRemoved {
            annotation: id,
            parent,
        });
        Ok(annotation)
    }

    // -- attribute mutation ------------------------------------------------

    /// Move a node on the canvas
    pub fn set_node_position(&mut self, id: NodeId, position: impl Into<Position>) -> Result<()> {
        let position = position.into();
        let node = self.node_mut(id).ok_or(SchemeError::UnknownNode(id))?;
        if node.position != position {
            node.position = position;
            self.emit(SchemeEvent::NodeMoved { node: id, position });
        }
        Ok(())
    }

    /// Retitle a node
    pub fn set_node_title(&mut self, id: NodeId, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        let node = self.node_mut(id).ok_or(SchemeError::UnknownNode(id))?;
        if node.title != title {
            node.title = title.clone();
            self.emit(SchemeEvent::NodeRetitled { node: id, title });
        }
        Ok(())
    }

    /// Update a node's progress, clamped to [-1, 100]
    pub fn set_node_progress(&mut self, id: NodeId, progress: f64) -> Result<()> {
        let progress = progress.clamp(-1.0, 100.0);
        let node = self.node_mut(id).ok_or(SchemeError::UnknownNode(id))?;
        if node.progress != progress {
            node.progress = progress;
            self.emit(SchemeEvent::NodeProgressChanged { node: id, progress });
        }
        Ok(())
    }

    /// Replace a node's runtime state flags
    pub fn set_node_state(&mut self, id: NodeId, state: NodeState) -> Result<()> {
        let node = self.node_mut(id).ok_or(SchemeError::UnknownNode(id))?;
        if node.state != state {
            node.state = state;
            self.emit(SchemeEvent::NodeStateChanged { node: id, state });
        }
        Ok(())
    }

    /// Update a node's status message
    pub fn set_node_status_message(&mut self, id: NodeId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let node = self.node_mut(id).ok_or(SchemeError::UnknownNode(id))?;
        if node.status_message != message {
            node.status_message = message.clone();
            self.emit(SchemeEvent::NodeStatusChanged { node: id, message });
        }
        Ok(())
    }

    /// Enable or disable a link; disabled links never propagate values
    pub fn set_link_enabled(&mut self, id: LinkId, enabled: bool) -> Result<()> {
        let link = self.link_mut(id).ok_or(SchemeError::UnknownLink(id))?;
        if link.enabled != enabled {
            link.enabled = enabled;
            self.emit(SchemeEvent::LinkEnabledChanged { link: id, enabled });
        }
        Ok(())
    }

    /// Replace a link's runtime state flags (signal-engine bookkeeping)
    pub fn set_link_state(&mut self, id: LinkId, state: LinkState) -> Result<()> {
        let link = self.link_mut(id).ok_or(SchemeError::UnknownLink(id))?;
        if link.state != state {
            link.state = state;
            self.emit(SchemeEvent::LinkStateChanged { link: id, state });
        }
        Ok(())
    }

    // -- validation entry points -------------------------------------------

    /// Validate a candidate link against this workflow's loop policy
    pub fn check_connect(&self, link: &Link) -> Result<Compatibility> {
        let source_parent = self
            .parent_of(link.source_node)
            .ok_or(SchemeError::UnknownNode(link.source_node))?;
        let sink_parent = self
            .parent_of(link.sink_node)
            .ok_or(SchemeError::UnknownNode(link.sink_node))?;
        if source_parent != sink_parent {
            return Err(SchemeError::EndpointMismatch);
        }
        let container = self.container_ref(source_parent)?;
        validation::check_connect(container, link, &self.registry, self.loop_policy)
    }

    /// Whether a candidate link would pass validation
    pub fn can_connect(&self, link: &Link) -> bool {
        self.check_connect(link).is_ok()
    }

    /// Whether a candidate link would close a cycle (self-loops included)
    pub fn creates_cycle(&self, link: &Link) -> bool {
        if link.source_node == link.sink_node {
            return true;
        }
        match self
            .parent_of(link.source_node)
            .and_then(|p| self.container_ref(p).ok())
        {
            Some(container) => validation::creates_cycle(container.links(), link),
            None => false,
        }
    }

    // -- dependency queries (boundary-transparent) -------------------------

    /// The node that actually produces values on `link`'s source end
    ///
    /// A link originating at a meta node's output channel is treated as
    /// originating from the matching output bridge inside it.
    pub fn resolve_link_source(&self, link: &Link) -> NodeId {
        if let Some(node) = self.node(link.source_node) {
            if let Some(contents) = node.contents() {
                for bridge in contents.output_nodes() {
                    if bridge.bridges_channel(&link.source_channel) {
                        return bridge.id;
                    }
                }
            }
        }
        link.source_node
    }

    /// The node that actually consumes values on `link`'s sink end
    pub fn resolve_link_sink(&self, link: &Link) -> NodeId {
        if let Some(node) = self.node(link.sink_node) {
            if let Some(contents) = node.contents() {
                for bridge in contents.input_nodes() {
                    if bridge.bridges_channel(&link.sink_channel) {
                        return bridge.id;
                    }
                }
            }
        }
        link.sink_node
    }

    fn one_hop(&self, id: NodeId, enabled_only: bool, upstream: bool) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        let node = match self.node(id) {
            Some(node) => node,
            None => return out,
        };
        let parent = self.parent_of(id);
        for link in self.all_links() {
            if enabled_only && !link.enabled {
                continue;
            }
            let neighbor = if upstream {
                if link.sink_node == id {
                    Some(self.resolve_link_source(link))
                } else if node.is_input_bridge()
                    && parent == Some(link.sink_node)
                    && node.bridges_channel(&link.sink_channel)
                {
                    // Outer link into the parent meta's boundary channel
                    // continues to this input bridge.
                    Some(self.resolve_link_source(link))
                } else {
                    None
                }
            } else if link.source_node == id {
                Some(self.resolve_link_sink(link))
            } else if node.is_output_bridge()
                && parent == Some(link.source_node)
                && node.bridges_channel(&link.source_channel)
            {
                Some(self.resolve_link_sink(link))
            } else {
                None
            };
            if let Some(neighbor) = neighbor {
                if !out.contains(&neighbor) {
                    out.push(neighbor);
                }
            }
        }
        out
    }

    /// Immediate upstream neighbors over all links
    pub fn node_dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.one_hop(id, false, true)
    }

    /// Immediate downstream neighbors over all links
    pub fn node_dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.one_hop(id, false, false)
    }

    /// Immediate upstream neighbors over enabled links only
    pub fn node_dependencies_enabled(&self, id: NodeId) -> Vec<NodeId> {
        self.one_hop(id, true, true)
    }

    /// Immediate downstream neighbors over enabled links only
    pub fn node_dependents_enabled(&self, id: NodeId) -> Vec<NodeId> {
        self.one_hop(id, true, false)
    }

    /// Immediate upstream neighbors (alias for [`Self::node_dependencies`])
    pub fn parent_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.node_dependencies(id)
    }

    /// Immediate downstream neighbors (alias for [`Self::node_dependents`])
    pub fn child_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.node_dependents(id)
    }

    fn closure(&self, id: NodeId, upstream: bool) -> Vec<NodeId> {
        let mut visited: Vec<NodeId> = Vec::new();
        let mut queue: Vec<NodeId> = self.one_hop(id, true, upstream);
        let mut head = 0;
        while head < queue.len() {
            let current = queue[head];
            head += 1;
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);
            for next in self.one_hop(current, true, upstream) {
                if !visited.contains(&next) {
                    queue.push(next);
                }
            }
        }
        visited
    }

    /// Breadth-first closure of upstream neighbors over enabled links
    pub fn upstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.closure(id, true)
    }

    /// Breadth-first closure of downstream neighbors over enabled links
    pub fn downstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.closure(id, false)
    }

    /// Whether `ancestor` precedes `node` over enabled links
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.upstream_nodes(node).contains(&ancestor)
    }

    // -- runtime environment -----------------------------------------------

    pub fn runtime_env(&self) -> &HashMap<String, Value> {
        &self.runtime_env
    }

    /// Store a keyed value in the workflow environment and notify sinks
    ///
    /// External consumers (e.g. execution-manager bridges) rely on this to
    /// learn of shared resources such as a base directory.
    pub fn set_runtime_env(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.runtime_env.insert(key.clone(), value);
        self.emit(SchemeEvent::RuntimeEnvChanged { key });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{InputChannel, OutputChannel};
    use crate::node::NodeDescription;

    fn leaf(name: &str) -> Node {
        Node::new(
            NodeDescription::new(format!("test.{name}"), name)
                .with_inputs(vec![InputChannel::new("in", "In", &["any"])])
                .with_outputs(vec![OutputChannel::new("out", "Out", &["any"])]),
        )
    }

    fn single_sink(name: &str) -> Node {
        Node::new(
            NodeDescription::new(format!("test.{name}"), name)
                .with_inputs(vec![InputChannel::new("in", "In", &["any"]).single()])
                .with_outputs(vec![OutputChannel::new("out", "Out", &["any"])]),
        )
    }

    #[test]
    fn test_add_and_link_nodes() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        let link = scheme.new_link(a, "out", b, "in").unwrap();

        assert_eq!(scheme.all_nodes().count(), 2);
        assert_eq!(scheme.all_links().count(), 1);
        assert!(scheme.link(link).is_some());
        assert_eq!(scheme.node_dependents(a), vec![b]);
        assert_eq!(scheme.node_dependencies(b), vec![a]);
    }

    #[test]
    fn test_duplicate_node_insert_rejected() {
        let mut scheme = Scheme::new("wf");
        let node = leaf("a");
        let copy = node.clone();
        scheme.add_node(node).unwrap();
        assert!(matches!(
            scheme.add_node(copy),
            Err(SchemeError::AlreadyInScheme)
        ));
    }

    #[test]
    fn test_single_sink_insert_is_transactional() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(single_sink("b")).unwrap();
        let c = scheme.add_node(leaf("c")).unwrap();

        scheme.new_link(a, "out", b, "in").unwrap();
        let before: Vec<LinkId> = scheme.all_links().map(|l| l.id).collect();

        let err = scheme.new_link(c, "out", b, "in").unwrap_err();
        assert!(matches!(err, SchemeError::SinkChannelOccupied { .. }));

        let after: Vec<LinkId> = scheme.all_links().map(|l| l.id).collect();
        assert_eq!(before, after);
        assert_eq!(scheme.node(b).unwrap().input_channels().len(), 1);
    }

    #[test]
    fn test_cycle_rejected_under_default_policy() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();

        let err = scheme.new_link(b, "out", a, "in").unwrap_err();
        assert!(matches!(err, SchemeError::Cycle(_)));
        assert!(scheme.creates_cycle(&Link::new(b, "out", a, "in")));
    }

    #[test]
    fn test_cycle_allowed_with_policy() {
        let mut scheme = Scheme::new("wf").with_loop_policy(LoopPolicy::AllowLoops);
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();
        scheme.new_link(b, "out", a, "in").unwrap();
        assert_eq!(scheme.all_links().count(), 2);
    }

    #[test]
    fn test_remove_node_cascades_links() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        let c = scheme.add_node(leaf("c")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();
        scheme.new_link(b, "out", c, "in").unwrap();

        scheme.remove_node(b).unwrap();
        assert_eq!(scheme.all_nodes().count(), 2);
        assert_eq!(scheme.all_links().count(), 0);
        assert!(scheme.all_links().all(|l| !l.touches(b)));
    }

    #[test]
    fn test_boundary_channel_bijection() {
        let mut scheme = Scheme::new("wf");
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let input_a = scheme
            .create_input_node(meta, InputChannel::new("a", "A", &["any"]))
            .unwrap();
        scheme
            .create_input_node(meta, InputChannel::new("b", "B", &["any"]))
            .unwrap();
        scheme
            .create_output_node(meta, OutputChannel::new("r", "R", &["any"]))
            .unwrap();

        let meta_node = scheme.node(meta).unwrap();
        let contents = meta_node.contents().unwrap();
        assert_eq!(meta_node.input_channels().len(), contents.input_nodes().len());
        assert_eq!(meta_node.output_channels().len(), contents.output_nodes().len());

        scheme.remove_node(input_a).unwrap();
        let meta_node = scheme.node(meta).unwrap();
        let contents = meta_node.contents().unwrap();
        assert_eq!(meta_node.input_channels().len(), 1);
        assert_eq!(contents.input_nodes().len(), 1);
    }

    #[test]
    fn test_removing_bridge_removes_outer_links() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let bridge = scheme
            .create_input_node(meta, InputChannel::new("data", "Data", &["any"]))
            .unwrap();
        scheme.new_link(a, "out", meta, "data").unwrap();
        assert_eq!(scheme.all_links().count(), 1);

        // Removing the bridge removes the meta's channel and the outer link
        // using it in the parent scope.
        scheme.remove_node(bridge).unwrap();
        assert_eq!(scheme.all_links().count(), 0);
        assert!(scheme.node(meta).unwrap().input_channels().is_empty());
    }

    #[test]
    fn test_remove_meta_clears_nested_content() {
        let mut scheme = Scheme::new("wf");
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let x = scheme.add_node_to(meta, leaf("x")).unwrap();
        let y = scheme.add_node_to(meta, leaf("y")).unwrap();
        scheme.new_link(x, "out", y, "in").unwrap();

        scheme.remove_node(meta).unwrap();
        assert_eq!(scheme.all_nodes().count(), 0);
        assert_eq!(scheme.all_links().count(), 0);
        assert!(scheme.node(x).is_none());
        assert!(scheme.node(y).is_none());
    }

    #[test]
    fn test_clear_removes_links_before_nodes() {
        let sink = crate::events::VecEventSink::new();
        let mut scheme = Scheme::new("wf");
        scheme.add_sink(sink.clone());
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();
        scheme.add_annotation(Annotation::text((0.0, 0.0, 10.0, 10.0), "note")).unwrap();
        sink.clear();

        scheme.clear().unwrap();
        assert_eq!(scheme.all_nodes().count(), 0);

        // For every node, the links touching it are removed strictly before
        // the node itself.
        let events = sink.events();
        let link_removed = events
            .iter()
            .position(|e| matches!(e, SchemeEvent::LinkRemoved { .. }))
            .unwrap();
        let node_removed = events
            .iter()
            .position(|e| matches!(e, SchemeEvent::NodeRemoved { .. }))
            .unwrap();
        assert!(link_removed < node_removed);
        assert!(matches!(events[0], SchemeEvent::AnnotationRemoved { .. }));
    }

    #[test]
    fn test_links_across_containers_rejected() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let x = scheme.add_node_to(meta, leaf("x")).unwrap();

        let err = scheme.new_link(a, "out", x, "in").unwrap_err();
        assert!(matches!(err, SchemeError::EndpointMismatch));
    }

    #[test]
    fn test_disabled_link_breaks_downstream_closure() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        let link = scheme.new_link(a, "out", b, "in").unwrap();

        assert!(scheme.downstream_nodes(a).contains(&b));
        scheme.set_link_enabled(link, false).unwrap();
        assert!(!scheme.downstream_nodes(a).contains(&b));
        scheme.set_link_enabled(link, true).unwrap();
        assert!(scheme.downstream_nodes(a).contains(&b));
    }

    #[test]
    fn test_dependency_queries_bridge_meta_boundaries() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let bridge_in = scheme
            .create_input_node(meta, InputChannel::new("data", "Data", &["any"]))
            .unwrap();
        let inner = scheme.add_node_to(meta, leaf("inner")).unwrap();
        let bridge_out = scheme
            .create_output_node(meta, OutputChannel::new("result", "Result", &["any"]))
            .unwrap();
        let z = scheme.add_node(leaf("z")).unwrap();

        scheme.new_link(a, "out", meta, "data").unwrap();
        scheme.new_link(bridge_in, "data", inner, "in").unwrap();
        scheme.new_link(inner, "out", bridge_out, "result").unwrap();
        scheme.new_link(meta, "result", z, "in").unwrap();

        // The outer link continues to the input bridge, not the meta.
        assert_eq!(scheme.node_dependents(a), vec![bridge_in]);
        assert!(scheme.node_dependencies(bridge_in).contains(&a));
        // Symmetrically, the outgoing link originates at the output bridge.
        assert_eq!(scheme.node_dependencies(z), vec![bridge_out]);
        assert!(scheme.node_dependents(bridge_out).contains(&z));

        // Closure crosses the whole boundary chain.
        let downstream = scheme.downstream_nodes(a);
        assert!(downstream.contains(&inner));
        assert!(downstream.contains(&z));
        assert!(scheme.is_ancestor(a, z));
        assert!(!scheme.is_ancestor(z, a));
    }

    #[test]
    fn test_structural_events_are_ordered() {
        let sink = crate::events::VecEventSink::new();
        let mut scheme = Scheme::new("wf");
        scheme.add_sink(sink.clone());

        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();
        scheme.remove_node(b).unwrap();

        let events = sink.events();
        assert!(matches!(events[0], SchemeEvent::NodeAdded { .. }));
        assert!(matches!(events[1], SchemeEvent::NodeAdded { .. }));
        assert!(matches!(events[2], SchemeEvent::LinkAdded { .. }));
        // Cascade: link removal precedes node removal.
        assert!(matches!(events[3], SchemeEvent::LinkRemoved { .. }));
        assert!(matches!(events[4], SchemeEvent::NodeRemoved { node, .. } if node == b));
    }

    #[test]
    fn test_runtime_env_notifies() {
        let sink = crate::events::VecEventSink::new();
        let mut scheme = Scheme::new("wf");
        scheme.add_sink(sink.clone());

        scheme.set_runtime_env("basedir", serde_json::json!("/tmp/project"));
        assert_eq!(
            scheme.runtime_env().get("basedir"),
            Some(&serde_json::json!("/tmp/project"))
        );
        assert!(matches!(
            sink.events().last(),
            Some(SchemeEvent::RuntimeEnvChanged { .. })
        ));
    }

    #[test]
    fn test_find_links_filters() {
        let mut scheme = Scheme::new("wf");
        let a = scheme.add_node(leaf("a")).unwrap();
        let b = scheme.add_node(leaf("b")).unwrap();
        let c = scheme.add_node(leaf("c")).unwrap();
        scheme.new_link(a, "out", b, "in").unwrap();
        scheme.new_link(a, "out", c, "in").unwrap();

        assert_eq!(scheme.find_links(Some(a), None, None, None).len(), 2);
        assert_eq!(scheme.find_links(Some(a), None, Some(b), None).len(), 1);
        assert_eq!(scheme.find_links(None, None, None, Some("in")).len(), 2);
        assert_eq!(scheme.find_links(Some(c), None, None, None).len(), 0);
    }

    #[test]
    fn test_attribute_setters_emit_once() {
        let sink = crate::events::VecEventSink::new();
        let mut scheme = Scheme::new("wf");
        scheme.add_sink(sink.clone());
        let a = scheme.add_node(leaf("a")).unwrap();
        sink.clear();

        scheme.set_node_position(a, (10.0, 20.0)).unwrap();
        scheme.set_node_position(a, (10.0, 20.0)).unwrap();
        scheme.set_node_progress(a, 250.0).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SchemeEvent::NodeMoved { .. }));
        assert!(
            matches!(events[1], SchemeEvent::NodeProgressChanged { progress, .. } if progress == 100.0)
        );
    }
}
