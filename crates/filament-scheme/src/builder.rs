//! Fluent builder for constructing workflows programmatically
//!
//! Mostly a convenience for tests and hosts that assemble graphs in code;
//! every insertion still goes through the standard validated operations.

use crate::channel::{InputChannel, OutputChannel};
use crate::errors::Result;
use crate::link::Link;
use crate::node::{Node, NodeDescription};
use crate::scheme::Scheme;
use crate::types::{LoopPolicy, NodeId};

/// Fluent builder for a [`Scheme`]
///
/// # Example
///
/// ```
/// use filament_scheme::builder::SchemeBuilder;
///
/// let (scheme, ids) = SchemeBuilder::new("My Workflow")
///     .node("source", &[], &[("out", &["int"])])
///     .node("sink", &[("in", &["number"])], &[])
///     .link("source", "out", "sink", "in")
///     .build()
///     .unwrap();
/// assert_eq!(scheme.all_links().count(), 1);
/// assert!(ids.contains_key("source"));
/// ```
pub struct SchemeBuilder {
    title: String,
    loop_policy: LoopPolicy,
    nodes: Vec<(String, Node)>,
    links: Vec<(String, String, String, String)>,
}

impl SchemeBuilder {
    /// Create a new builder
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            loop_policy: LoopPolicy::default(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Set the workflow loop policy
    pub fn loop_policy(mut self, policy: LoopPolicy) -> Self {
        self.loop_policy = policy;
        self
    }

    /// Add a leaf node keyed by `name`, with (id, types) channel specs
    pub fn node(
        mut self,
        name: &str,
        inputs: &[(&str, &[&str])],
        outputs: &[(&str, &[&str])],
    ) -> Self {
        let description = NodeDescription::new(format!("builder.{name}"), name)
            .with_inputs(
                inputs
                    .iter()
                    .map(|(id, types)| InputChannel::new(*id, *id, types))
                    .collect(),
            )
            .with_outputs(
                outputs
                    .iter()
                    .map(|(id, types)| OutputChannel::new(*id, *id, types))
                    .collect(),
            );
        self.nodes.push((name.to_string(), Node::new(description)));
        self
    }

    /// Add a pre-built node keyed by `name`
    pub fn raw_node(mut self, name: &str, node: Node) -> Self {
        self.nodes.push((name.to_string(), node));
        self
    }

    /// Add a link between two named nodes
    pub fn link(mut self, source: &str, source_channel: &str, sink: &str, sink_channel: &str) -> Self {
        self.links.push((
            source.to_string(),
            source_channel.to_string(),
            sink.to_string(),
            sink_channel.to_string(),
        ));
        self
    }

    /// Build the workflow, returning it plus the name → id map
    pub fn build(self) -> Result<(Scheme, std::collections::HashMap<String, NodeId>)> {
        let mut scheme = Scheme::new(self.title).with_loop_policy(self.loop_policy);
        let mut ids = std::collections::HashMap::new();
        for (name, node) in self.nodes {
            let id = scheme.add_node(node)?;
            ids.insert(name, id);
        }
        for (source, source_channel, sink, sink_channel) in self.links {
            let source_id = ids
                .get(&source)
                .copied()
                .ok_or_else(|| crate::errors::SchemeError::UnknownNodeName(source.clone()))?;
            let sink_id = ids
                .get(&sink)
                .copied()
                .ok_or_else(|| crate::errors::SchemeError::UnknownNodeName(sink.clone()))?;
            scheme.add_link(Link::new(source_id, source_channel, sink_id, sink_channel))?;
        }
        Ok((scheme, ids))
    }
}
