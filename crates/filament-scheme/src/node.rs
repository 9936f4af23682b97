//! Node model: leaf nodes, boundary bridges and meta-node containers
//!
//! A [`Node`] is a workflow graph vertex. Leaf nodes are backed by an
//! externally supplied [`NodeDescription`]; [`NodeKind::Meta`] nodes own a
//! nested subgraph; [`NodeKind::Input`]/[`NodeKind::Output`] nodes bridge a
//! meta node's boundary channels into the nested scope.
//!
//! Containers own their children by value. All validated, event-emitting
//! mutation goes through [`crate::scheme::Scheme`]; the raw container
//! mutators here are crate-private.

use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::channel::{InputChannel, OutputChannel};
use crate::link::Link;
use crate::types::{AnnotationId, ChannelId, LinkId, NodeId, NodeState, Position};

/// Description of a leaf node type, supplied by the external registry
///
/// The model only reads descriptions; it never computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    /// Qualified type name (e.g. "filament.data.Select")
    pub qualified_name: String,
    /// Human-readable name
    pub name: String,
    /// Input channel descriptors, in declaration order
    pub inputs: Vec<InputChannel>,
    /// Output channel descriptors, in declaration order
    pub outputs: Vec<OutputChannel>,
}

impl NodeDescription {
    pub fn new(qualified_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<InputChannel>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputChannel>) -> Self {
        self.outputs = outputs;
        self
    }
}

/// The variant-specific payload of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Leaf node backed by a description
    Scheme { description: NodeDescription },
    /// Container node owning a nested subgraph
    Meta { contents: MetaNode },
    /// Boundary bridge: produces the parent meta's input channel inside it
    Input { channel: InputChannel },
    /// Boundary bridge: consumes a value and exposes it on the parent
    /// meta's output channel
    Output { channel: OutputChannel },
}

/// A workflow graph vertex
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub position: Position,
    /// Progress in [-1, 100]; -1 means indeterminate
    pub progress: f64,
    pub state: NodeState,
    pub status_message: String,
    /// Opaque key-value payload, round-tripped but never interpreted
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    fn with_kind(title: String, kind: NodeKind) -> Self {
        Self {
            id: NodeId::fresh(),
            title,
            position: Position::default(),
            progress: -1.0,
            state: NodeState::default(),
            status_message: String::new(),
            properties: serde_json::Map::new(),
            kind,
        }
    }

    /// Create a leaf node; titled after the description name
    pub fn new(description: NodeDescription) -> Self {
        let title = description.name.clone();
        Self::with_kind(title, NodeKind::Scheme { description })
    }

    /// Create an empty meta node
    pub fn meta(title: impl Into<String>) -> Self {
        Self::with_kind(
            title.into(),
            NodeKind::Meta {
                contents: MetaNode::default(),
            },
        )
    }

    /// Create an input bridge node; titled after the channel name
    pub fn input(channel: InputChannel) -> Self {
        let title = channel.name.clone();
        Self::with_kind(title, NodeKind::Input { channel })
    }

    /// Create an output bridge node; titled after the channel name
    pub fn output(channel: OutputChannel) -> Self {
        let title = channel.name.clone();
        Self::with_kind(title, NodeKind::Output { channel })
    }

    /// Set the canvas position at construction
    pub fn at(mut self, position: impl Into<Position>) -> Self {
        self.position = position.into();
        self
    }

    /// Set the title at construction
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the opaque properties payload at construction
    pub fn with_properties(mut self, properties: serde_json::Map<String, serde_json::Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.kind, NodeKind::Meta { .. })
    }

    pub fn is_input_bridge(&self) -> bool {
        matches!(self.kind, NodeKind::Input { .. })
    }

    pub fn is_output_bridge(&self) -> bool {
        matches!(self.kind, NodeKind::Output { .. })
    }

    /// The bridged channel id, for boundary bridge nodes
    pub fn bridge_channel(&self) -> Option<&ChannelId> {
        match &self.kind {
            NodeKind::Input { channel } => Some(&channel.id),
            NodeKind::Output { channel } => Some(&channel.id),
            _ => None,
        }
    }

    /// Whether this bridge node carries the named boundary channel,
    /// directly or via a legacy id
    pub fn bridges_channel(&self, id: &str) -> bool {
        match &self.kind {
            NodeKind::Input { channel } => channel.matches_id(id),
            NodeKind::Output { channel } => channel.matches_id(id),
            _ => false,
        }
    }

    /// The nested container, for meta nodes
    pub fn contents(&self) -> Option<&MetaNode> {
        match &self.kind {
            NodeKind::Meta { contents } => Some(contents),
            _ => None,
        }
    }

    pub(crate) fn contents_mut(&mut self) -> Option<&mut MetaNode> {
        match &mut self.kind {
            NodeKind::Meta { contents } => Some(contents),
            _ => None,
        }
    }

    /// The node's input channels, in order
    ///
    /// For a meta node this is the ordered projection of its input bridge
    /// children; for an output bridge it is the mirrored boundary channel.
    pub fn input_channels(&self) -> Vec<InputChannel> {
        match &self.kind {
            NodeKind::Scheme { description } => description.inputs.clone(),
            NodeKind::Meta { contents } => contents.input_channels(),
            NodeKind::Input { .. } => Vec::new(),
            NodeKind::Output { channel } => vec![InputChannel::from(channel)],
        }
    }

    /// The node's output channels, in order
    pub fn output_channels(&self) -> Vec<OutputChannel> {
        match &self.kind {
            NodeKind::Scheme { description } => description.outputs.clone(),
            NodeKind::Meta { contents } => contents.output_channels(),
            NodeKind::Input { channel } => vec![OutputChannel::from(channel)],
            NodeKind::Output { .. } => Vec::new(),
        }
    }

    /// Look up an input channel by id, honoring legacy `replaces` ids
    pub fn input_channel(&self, id: &str) -> Option<InputChannel> {
        self.input_channels().into_iter().find(|c| c.matches_id(id))
    }

    /// Look up an output channel by id, honoring legacy `replaces` ids
    pub fn output_channel(&self, id: &str) -> Option<OutputChannel> {
        self.output_channels().into_iter().find(|c| c.matches_id(id))
    }
}

/// The contents of a container node: child nodes, links and annotations
///
/// All three sequences are insertion-order-significant. Every mutation is
/// driven by [`crate::scheme::Scheme`], which validates first and emits
/// structural events after committing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaNode {
    nodes: Vec<Node>,
    links: Vec<Link>,
    annotations: Vec<Annotation>,
}

impl MetaNode {
    /// Direct child nodes, in insertion order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Direct links, in insertion order
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Direct annotations, in insertion order
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Find a direct child node
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a direct link
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Input bridge children, in insertion order
    pub fn input_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_input_bridge()).collect()
    }

    /// Output bridge children, in insertion order
    pub fn output_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_output_bridge()).collect()
    }

    /// The container's input channels: the ordered projection of its input
    /// bridge children's boundary channels
    pub fn input_channels(&self) -> Vec<InputChannel> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Input { channel } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// The container's output channels: the ordered projection of its
    /// output bridge children's boundary channels
    pub fn output_channels(&self) -> Vec<OutputChannel> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Output { channel } => Some(channel.clone()),
                _ => None,
            })
            .collect()
    }

    /// Filter direct links; a `None` argument matches all
    pub fn find_links(
        &self,
        source_node: Option<NodeId>,
        source_channel: Option<&str>,
        sink_node: Option<NodeId>,
        sink_channel: Option<&str>,
    ) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|l| {
                source_node.map_or(true, |n| l.source_node == n)
                    && source_channel.map_or(true, |c| l.source_channel == c)
                    && sink_node.map_or(true, |n| l.sink_node == n)
                    && sink_channel.map_or(true, |c| l.sink_channel == c)
            })
            .collect()
    }

    /// All nodes of the nested subgraph, depth-first
    ///
    /// Each call produces a fresh traversal; meta-node boundaries are
    /// transparent (a meta node is yielded, then its contents).
    pub fn all_nodes(&self) -> AllNodes<'_> {
        AllNodes {
            stack: vec![self.nodes.iter()],
        }
    }

    /// All links of the nested subgraph, depth-first
    pub fn all_links(&self) -> AllLinks<'_> {
        AllLinks {
            links: self.links.iter(),
            nodes: vec![self.nodes.iter()],
        }
    }

    /// All annotations of the nested subgraph, depth-first
    pub fn all_annotations(&self) -> AllAnnotations<'_> {
        AllAnnotations {
            annotations: self.annotations.iter(),
            nodes: vec![self.nodes.iter()],
        }
    }

    // -- raw container mutators, driven by Scheme --------------------------

    pub(crate) fn insert_node_at(&mut self, index: usize, node: Node) {
        self.nodes.insert(index, node);
    }

    pub(crate) fn take_node(&mut self, id: NodeId) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(index))
    }

    pub(crate) fn insert_link_at(&mut self, index: usize, link: Link) {
        self.links.insert(index, link);
    }

    pub(crate) fn take_link(&mut self, id: LinkId) -> Option<Link> {
        let index = self.links.iter().position(|l| l.id == id)?;
        Some(self.links.remove(index))
    }

    pub(crate) fn insert_annotation_at(&mut self, index: usize, annotation: Annotation) {
        self.annotations.insert(index, annotation);
    }

    pub(crate) fn take_annotation(&mut self, id: AnnotationId) -> Option<Annotation> {
        let index = self.annotations.iter().position(|a| a.id == id)?;
        Some(self.annotations.remove(index))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.iter_mut().find(|l| l.id == id)
    }

    /// Find a node anywhere in the nested subgraph
    pub(crate) fn find_node_deep(&self, id: NodeId) -> Option<&Node> {
        self.all_nodes().find(|n| n.id == id)
    }

    pub(crate) fn find_node_deep_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        for node in self.nodes.iter_mut() {
            if node.id == id {
                return Some(node);
            }
            if let NodeKind::Meta { contents } = &mut node.kind {
                if let Some(found) = contents.find_node_deep_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Find the container holding `id` as a direct child, returning the
    /// path of meta-node ids from here down (empty when `id` is direct)
    pub(crate) fn container_of(&self, id: NodeId) -> Option<Vec<NodeId>> {
        if self.nodes.iter().any(|n| n.id == id) {
            return Some(Vec::new());
        }
        for node in &self.nodes {
            if let NodeKind::Meta { contents } = &node.kind {
                if let Some(mut path) = contents.container_of(id) {
                    path.insert(0, node.id);
                    return Some(path);
                }
            }
        }
        None
    }

    /// Find the container holding link `id`, as a path of meta-node ids
    pub(crate) fn container_of_link(&self, id: LinkId) -> Option<Vec<NodeId>> {
        if self.links.iter().any(|l| l.id == id) {
            return Some(Vec::new());
        }
        for node in &self.nodes {
            if let NodeKind::Meta { contents } = &node.kind {
                if let Some(mut path) = contents.container_of_link(id) {
                    path.insert(0, node.id);
                    return Some(path);
                }
            }
        }
        None
    }

    /// Find the container holding annotation `id`, as a path of meta-node ids
    pub(crate) fn container_of_annotation(&self, id: AnnotationId) -> Option<Vec<NodeId>> {
        if self.annotations.iter().any(|a| a.id == id) {
            return Some(Vec::new());
        }
        for node in &self.nodes {
            if let NodeKind::Meta { contents } = &node.kind {
                if let Some(mut path) = contents.container_of_annotation(id) {
                    path.insert(0, node.id);
                    return Some(path);
                }
            }
        }
        None
    }

    /// Descend along a path of meta-node ids
    pub(crate) fn descend_mut(&mut self, path: &[NodeId]) -> Option<&mut MetaNode> {
        let mut current = self;
        for id in path {
            current = current.node_mut(*id)?.contents_mut()?;
        }
        Some(current)
    }

    pub(crate) fn descend(&self, path: &[NodeId]) -> Option<&MetaNode> {
        let mut current = self;
        for id in path {
            current = current.node(*id)?.contents()?;
        }
        Some(current)
    }
}

/// Depth-first iterator over all nodes of a nested subgraph
pub struct AllNodes<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for AllNodes<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let iter = self.stack.last_mut()?;
            match iter.next() {
                Some(node) => {
                    if let NodeKind::Meta { contents } = &node.kind {
                        self.stack.push(contents.nodes.iter());
                    }
                    return Some(node);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Depth-first iterator over all links of a nested subgraph
pub struct AllLinks<'a> {
    links: std::slice::Iter<'a, Link>,
    nodes: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for AllLinks<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(link) = self.links.next() {
                return Some(link);
            }
            let iter = self.nodes.last_mut()?;
            match iter.next() {
                Some(node) => {
                    if let NodeKind::Meta { contents } = &node.kind {
                        self.links = contents.links.iter();
                        self.nodes.push(contents.nodes.iter());
                    }
                }
                None => {
                    self.nodes.pop();
                }
            }
        }
    }
}

/// Depth-first iterator over all annotations of a nested subgraph
pub struct AllAnnotations<'a> {
    annotations: std::slice::Iter<'a, Annotation>,
    nodes: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for AllAnnotations<'a> {
    type Item = &'a Annotation;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(annotation) = self.annotations.next() {
                return Some(annotation);
            }
            let iter = self.nodes.last_mut()?;
            match iter.next() {
                Some(node) => {
                    if let NodeKind::Meta { contents } = &node.kind {
                        self.annotations = contents.annotations.iter();
                        self.nodes.push(contents.nodes.iter());
                    }
                }
                None => {
                    self.nodes.pop();
                }
            }
        }
    }
}
