//! The signal manager: queueing, scheduling and delivery
//!
//! [`SignalManager`] tracks one workflow: an input queue of pending
//! [`Signal`]s, a per-(node, output-channel) cache of last sent values,
//! and a scheduler that selects the next eligible node for input
//! delivery subject to invalidation propagation, cycle containment and a
//! concurrency cap.
//!
//! The engine is single-threaded and host-pumped. Mutations that may
//! change node eligibility set an internal update request; the host runs
//! [`SignalManager::process_pending`] after its call stack unwinds (the
//! cooperative stand-in for the source design's debounced timer). The
//! host feeds structural workflow events to
//! [`SignalManager::handle_event`], typically by draining a
//! [`filament_scheme::VecEventSink`] registered on the scheme.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value;

use filament_scheme::{
    ChannelId, LinkId, Node, NodeId, Scheme, SchemeEvent,
};

use crate::config::{self, EngineSettings};
use crate::error::{EngineError, Result};
use crate::graph::strongly_connected_components;
use crate::signal::{compress_signals, Signal, SignalKind};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Stopped,
    Paused,
}

/// Runtime sub-state; `Processing` is held only for the duration of a
/// single node's input delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Waiting,
    Processing,
}

/// A value produced by a node, returned from the delivery hook
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub channel: ChannelId,
    pub value: Option<Value>,
    pub id: Option<String>,
}

impl NodeOutput {
    pub fn new(channel: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            channel: channel.into(),
            value,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// The execution host: actual per-node computation lives behind this seam
///
/// `send_to_node` may compute synchronously and return outputs directly
/// (they are fed back through [`SignalManager::send`] after delivery
/// bookkeeping completes), or return nothing and call
/// [`SignalManager::send`] later for asynchronous hosts, followed by
/// [`SignalManager::post_update_request`].
pub trait ExecutionHost {
    /// Deliver compressed input signals to a node
    fn send_to_node(
        &mut self,
        scheme: &Scheme,
        node: &Node,
        signals: Vec<Signal>,
    ) -> Result<Vec<NodeOutput>>;

    /// Whether the node is mid-execution and must hold back dependents
    fn is_blocking(&self, _node: &Node) -> bool {
        false
    }

    /// Whether the node can receive input now
    fn is_ready(&self, node: &Node) -> bool {
        !node.state.not_ready
    }
}

/// Cached output values for one (node, channel), keyed by signal id
#[derive(Debug, Clone, Default)]
struct OutputEntry {
    values: HashMap<Option<String>, Option<Value>>,
    invalidated: bool,
}

/// The signal-propagation execution engine
pub struct SignalManager {
    state: State,
    runtime_state: RuntimeState,
    queue: Vec<Signal>,
    outputs: HashMap<(NodeId, ChannelId), OutputEntry>,
    /// Dynamic links currently failing the runtime type check; structural
    /// `enabled` is untouched
    runtime_disabled: HashSet<LinkId>,
    settings: EngineSettings,
    max_active: Option<i32>,
    update_requested: bool,
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl SignalManager {
    /// Create a manager in the `Running` state
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            state: State::Running,
            runtime_state: RuntimeState::Waiting,
            queue: Vec::new(),
            outputs: HashMap::new(),
            runtime_disabled: HashSet::new(),
            settings,
            max_active: None,
            update_requested: false,
        }
    }

    /// Explicitly override the concurrency cap
    pub fn with_max_active(mut self, max_active: i32) -> Self {
        self.max_active = Some(max_active);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn runtime_state(&self) -> RuntimeState {
        self.runtime_state
    }

    /// Start (or restart) scheduling
    pub fn start(&mut self) {
        self.state = State::Running;
        self.update_requested = true;
    }

    /// Stop: no further scheduling passes run; a delivery already in
    /// flight completes
    pub fn stop(&mut self) {
        self.state = State::Stopped;
    }

    /// Pause: signals are tracked but not delivered
    pub fn pause(&mut self) {
        self.state = State::Paused;
    }

    /// Resume a paused manager
    pub fn resume(&mut self) {
        if self.state == State::Paused {
            self.state = State::Running;
            self.update_requested = true;
        }
    }

    /// Note that node eligibility may have changed out-of-band
    ///
    /// Hosts call this after anything that could unblock a node (a node
    /// finished executing, a ready flag cleared), then pump
    /// [`Self::process_pending`].
    pub fn post_update_request(&mut self) {
        self.update_requested = true;
    }

    /// Whether a scheduling pass is wanted
    pub fn update_requested(&self) -> bool {
        self.update_requested
    }

    // -- queue and cache queries -------------------------------------------

    /// Whether the node has queued but undelivered input
    pub fn is_pending(&self, node: NodeId) -> bool {
        self.queue.iter().any(|s| s.sink_node == node)
    }

    /// Nodes with queued input, in first-arrival order
    pub fn pending_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for signal in &self.queue {
            if !out.contains(&signal.sink_node) {
                out.push(signal.sink_node);
            }
        }
        out
    }

    /// The queued signals destined for a node, in arrival order
    pub fn pending_input_signals(&self, node: NodeId) -> Vec<&Signal> {
        self.queue.iter().filter(|s| s.sink_node == node).collect()
    }

    /// Drop queued signals destined for a node without delivering them
    pub fn remove_pending_signals(&mut self, node: NodeId) {
        self.queue.retain(|s| s.sink_node != node);
    }

    /// Whether any of the node's output channels is invalidated
    pub fn has_invalidated_outputs(&self, node: NodeId) -> bool {
        self.outputs
            .iter()
            .any(|((n, _), entry)| *n == node && entry.invalidated)
    }

    /// The node's invalidated output channels
    pub fn invalidated_channels(&self, node: NodeId) -> Vec<ChannelId> {
        self.outputs
            .iter()
            .filter(|((n, _), entry)| *n == node && entry.invalidated)
            .map(|((_, channel), _)| channel.clone())
            .collect()
    }

    /// Whether the node is invalidated, by flag or by stale outputs
    pub fn is_invalidated(&self, scheme: &Scheme, node: NodeId) -> bool {
        scheme.node(node).map_or(false, |n| n.state.invalidated)
            || self.has_invalidated_outputs(node)
    }

    /// Whether a dynamic link is currently held back by the runtime check
    pub fn is_runtime_disabled(&self, link: LinkId) -> bool {
        self.runtime_disabled.contains(&link)
    }

    /// The last value sent on a (node, channel, id) slot, if any
    pub fn cached_output(&self, node: NodeId, channel: &str, id: Option<&str>) -> Option<&Option<Value>> {
        self.outputs
            .get(&(node, channel.to_string()))
            .and_then(|entry| entry.values.get(&id.map(String::from)))
    }

    /// Nodes the host reports as mid-execution
    pub fn blocking_nodes(&self, scheme: &Scheme, host: &dyn ExecutionHost) -> Vec<NodeId> {
        scheme
            .all_nodes()
            .filter(|n| host.is_blocking(n))
            .map(|n| n.id)
            .collect()
    }

    // -- producing values --------------------------------------------------

    /// Record a value on a node's output channel and enqueue deliveries
    ///
    /// Overwrites the cached value for `(channel, id)`, clears the
    /// channel's invalidated flag, classifies the delivery as `New` or
    /// `Update`, and enqueues one signal per *enabled* outgoing link
    /// (clearing each link's invalidated flag and marking it pending).
    pub fn send(
        &mut self,
        scheme: &mut Scheme,
        node: NodeId,
        channel: &str,
        value: Option<Value>,
        id: Option<String>,
    ) -> Result<()> {
        let channel_id = self.resolve_output_channel(scheme, node, channel)?;

        let entry = self.outputs.entry((node, channel_id.clone())).or_default();
        let kind = if entry.values.contains_key(&id) {
            SignalKind::Update
        } else {
            SignalKind::New
        };
        entry.values.insert(id.clone(), value.clone());
        entry.invalidated = false;

        for link_id in self.output_links_of(scheme, node, &channel_id) {
            let (enabled, state, sink_channel) = match scheme.link(link_id) {
                Some(link) => (link.enabled, link.state, link.sink_channel.clone()),
                None => continue,
            };
            if !enabled {
                continue;
            }
            let sink = match scheme.link(link_id) {
                Some(link) => scheme.resolve_link_sink(link),
                None => continue,
            };
            let index = self
                .input_links_of(scheme, sink)
                .iter()
                .position(|l| *l == link_id)
                .unwrap_or(0);
            self.queue.push(Signal {
                link: link_id,
                sink_node: sink,
                sink_channel,
                value: value.clone(),
                id: id.clone(),
                index,
                kind,
            });
            let mut new_state = state;
            new_state.invalidated = false;
            new_state.pending = true;
            scheme.set_link_state(link_id, new_state)?;
            self.mark_pending(scheme, sink, true)?;
        }
        self.update_requested = true;
        Ok(())
    }

    /// Declare a node's output stale without sending a value
    ///
    /// Sets the invalidated flag on the output cache entry and propagates
    /// it onto every outgoing link from the channel, holding dependents
    /// back until the next [`Self::send`].
    pub fn invalidate(&mut self, scheme: &mut Scheme, node: NodeId, channel: &str) -> Result<()> {
        let channel_id = self.resolve_output_channel(scheme, node, channel)?;
        self.outputs
            .entry((node, channel_id.clone()))
            .or_default()
            .invalidated = true;
        for link_id in self.output_links_of(scheme, node, &channel_id) {
            if let Some(link) = scheme.link(link_id) {
                let mut state = link.state;
                state.invalidated = true;
                scheme.set_link_state(link_id, state)?;
            }
        }
        self.update_requested = true;
        Ok(())
    }

    fn resolve_output_channel(
        &self,
        scheme: &Scheme,
        node: NodeId,
        channel: &str,
    ) -> Result<ChannelId> {
        let node_ref = scheme.node(node).ok_or(EngineError::UnknownNode(node))?;
        node_ref
            .output_channel(channel)
            .map(|c| c.id)
            .or_else(|| {
                // An output bridge produces on its boundary channel.
                if node_ref.is_output_bridge() && node_ref.bridges_channel(channel) {
                    node_ref.bridge_channel().cloned()
                } else {
                    None
                }
            })
            .ok_or_else(|| EngineError::UnknownOutputChannel {
                node,
                channel: channel.to_string(),
            })
    }

    // -- structural change tracking ----------------------------------------

    /// Track a structural workflow event
    ///
    /// Link additions replay the source's cached values as `New` signals
    /// and mirror its invalidated flag; link removals schedule a
    /// synthetic `Close` for the sink; node removals purge queue and
    /// cache. Hosts forward every event emitted by the scheme, in order.
    pub fn handle_event(&mut self, scheme: &mut Scheme, event: &SchemeEvent) {
        match event {
            SchemeEvent::LinkAdded { link, .. } => self.replay_link(scheme, *link),
            SchemeEvent::LinkEnabledChanged { link, enabled: true } => {
                self.replay_link(scheme, *link)
            }
            SchemeEvent::LinkRemoved {
                link,
                sink_node,
                sink_channel,
                ..
            } => {
                self.runtime_disabled.remove(link);
                let sink = match scheme.node(*sink_node) {
                    Some(node) if node.is_meta() => node
                        .contents()
                        .and_then(|c| {
                            c.input_nodes()
                                .into_iter()
                                .find(|b| b.bridges_channel(sink_channel))
                                .map(|b| b.id)
                        }),
                    Some(_) => Some(*sink_node),
                    // The sink went away in the same cascade; the purge on
                    // its NodeRemoved event covers it.
                    None => None,
                };
                if let Some(sink) = sink {
                    self.queue.push(Signal {
                        link: *link,
                        sink_node: sink,
                        sink_channel: sink_channel.clone(),
                        value: None,
                        id: None,
                        index: 0,
                        kind: SignalKind::Close,
                    });
                    let _ = self.mark_pending(scheme, sink, true);
                    self.update_requested = true;
                }
            }
            SchemeEvent::NodeRemoved { node, .. } => {
                self.queue.retain(|s| s.sink_node != *node);
                self.outputs.retain(|(n, _), _| n != node);
                self.update_requested = true;
            }
            _ => {}
        }
    }

    /// Synthesize `New` signals on a link from the source's cached values
    fn replay_link(&mut self, scheme: &mut Scheme, link_id: LinkId) {
        let Some(link) = scheme.link(link_id) else { return };
        if !link.enabled {
            return;
        }
        let source = scheme.resolve_link_source(link);
        let source_channel = link.source_channel.clone();
        let sink = scheme.resolve_link_sink(link);
        let sink_channel = link.sink_channel.clone();
        let mut state = link.state;

        let Some(entry) = self.outputs.get(&(source, source_channel)) else {
            return;
        };
        let invalidated = entry.invalidated;
        let cached: Vec<(Option<String>, Option<Value>)> = entry
            .values
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();

        let index = self
            .input_links_of(scheme, sink)
            .iter()
            .position(|l| *l == link_id)
            .unwrap_or(0);
        for (id, value) in cached {
            self.queue.push(Signal {
                link: link_id,
                sink_node: sink,
                sink_channel: sink_channel.clone(),
                value,
                id,
                index,
                kind: SignalKind::New,
            });
            state.pending = true;
            let _ = self.mark_pending(scheme, sink, true);
            self.update_requested = true;
        }
        state.invalidated = invalidated;
        let _ = scheme.set_link_state(link_id, state);
    }

    // -- link topology helpers ---------------------------------------------

    /// Outgoing links of a (node, channel), boundary bridges included
    ///
    /// For an output bridge this is the set of links originating at the
    /// parent meta node's matching boundary channel.
    fn output_links_of(&self, scheme: &Scheme, node: NodeId, channel: &str) -> Vec<LinkId> {
        let parent = scheme.parent_of(node);
        let forwards_boundary = scheme
            .node(node)
            .map_or(false, |n| n.is_output_bridge() && n.bridges_channel(channel));
        let mut out = Vec::new();
        for link in scheme.all_links() {
            if link.source_node == node && link.source_channel == channel {
                out.push(link.id);
            } else if forwards_boundary
                && Some(link.source_node) == parent
                && link.source_channel == channel
            {
                out.push(link.id);
            }
        }
        out
    }

    /// The node's input links in traversal order (boundary-resolved)
    fn input_links_of(&self, scheme: &Scheme, node: NodeId) -> Vec<LinkId> {
        scheme
            .all_links()
            .filter(|l| scheme.resolve_link_sink(l) == node)
            .map(|l| l.id)
            .collect()
    }

    fn mark_pending(&self, scheme: &mut Scheme, node: NodeId, pending: bool) -> Result<()> {
        if let Some(node_ref) = scheme.node(node) {
            let mut state = node_ref.state;
            if state.pending != pending {
                state.pending = pending;
                scheme.set_node_state(node, state)?;
            }
        }
        Ok(())
    }

    fn downstream_closure(&self, scheme: &Scheme, start: NodeId) -> HashSet<NodeId> {
        let mut out: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = scheme.node_dependents_enabled(start).into();
        while let Some(current) = queue.pop_front() {
            if out.insert(current) {
                queue.extend(scheme.node_dependents_enabled(current));
            }
        }
        out
    }

    // -- scheduling --------------------------------------------------------

    /// The set of nodes eligible for the next input delivery
    ///
    /// A pending node is eligible unless a (transitive, enabled-link)
    /// ancestor is blocking, carries invalidated outputs, is itself
    /// invalidated, or is pending — except that members of the same
    /// strongly connected component never block each other, so feedback
    /// loops cannot starve themselves.
    pub fn node_update_front(&self, scheme: &Scheme, host: &dyn ExecutionHost) -> Vec<NodeId> {
        let node_ids: Vec<NodeId> = scheme.all_nodes().map(|n| n.id).collect();
        let components =
            strongly_connected_components(&node_ids, |n| scheme.node_dependents_enabled(*n));
        let mut component_of: HashMap<NodeId, usize> = HashMap::new();
        for (i, component) in components.iter().enumerate() {
            for id in component {
                component_of.insert(*id, i);
            }
        }

        let mut blocked: HashSet<NodeId> = HashSet::new();
        for node in scheme.all_nodes() {
            if host.is_blocking(node)
                || node.state.invalidated
                || self.has_invalidated_outputs(node.id)
            {
                blocked.extend(self.downstream_closure(scheme, node.id));
                blocked.insert(node.id);
            }
        }

        let pending = self.pending_nodes();
        let mut pending_downstream: HashSet<NodeId> = HashSet::new();
        for p in &pending {
            let mut downstream = self.downstream_closure(scheme, *p);
            let mates: &[NodeId] = component_of
                .get(p)
                .map(|i| components[*i].as_slice())
                .unwrap_or(&[]);
            let in_cycle =
                mates.len() > 1 || scheme.node_dependents_enabled(*p).contains(p);
            if in_cycle {
                for mate in mates {
                    downstream.remove(mate);
                }
                downstream.remove(p);
            }
            pending_downstream.extend(downstream);
        }

        pending
            .into_iter()
            .filter(|n| scheme.node(*n).is_some())
            .filter(|n| !blocked.contains(n) && !pending_downstream.contains(n))
            .collect()
    }

    /// Choose the node to deliver to next
    ///
    /// Prefers a node that is already executing (its newer inputs preempt
    /// a fresh start elsewhere); otherwise a fresh start is gated by the
    /// concurrency cap. Already-active nodes are exempt from the cap.
    fn select_next(&self, scheme: &Scheme, host: &dyn ExecutionHost) -> Option<NodeId> {
        let ready: Vec<NodeId> = self
            .node_update_front(scheme, host)
            .into_iter()
            .filter(|n| scheme.node(*n).map_or(false, |node| host.is_ready(node)))
            .collect();

        if let Some(active) = ready
            .iter()
            .copied()
            .find(|n| scheme.node(*n).map_or(false, |node| node.state.running))
        {
            return Some(active);
        }

        let active_count = scheme.all_nodes().filter(|n| n.state.running).count();
        let cap = config::max_active(self.max_active, &self.settings);
        if active_count < cap {
            ready.first().copied()
        } else {
            None
        }
    }

    /// Run one scheduling pass: deliver queued input to at most one node
    ///
    /// Returns whether a delivery happened. No-op unless `Running`. If
    /// invoked re-entrantly from within a delivery (a host hook that
    /// yields control back), the pass is deferred instead of nesting.
    /// After a delivery, `update_requested` stays set while signals
    /// remain queued, so hosts keep pumping until it clears.
    pub fn process_pending(
        &mut self,
        scheme: &mut Scheme,
        host: &mut dyn ExecutionHost,
    ) -> Result<bool> {
        if self.state != State::Running {
            return Ok(false);
        }
        if self.runtime_state == RuntimeState::Processing {
            self.update_requested = true;
            return Ok(false);
        }
        self.update_requested = false;
        let next = match self.select_next(scheme, host) {
            Some(node) => node,
            None => return Ok(false),
        };
        log::debug!("delivering queued input to node {next}");
        self.process_node(scheme, host, next)?;
        if !self.queue.is_empty() {
            self.update_requested = true;
        }
        Ok(true)
    }

    /// Pump scheduling passes until no node is eligible
    ///
    /// A convenience for synchronous hosts; returns the number of
    /// deliveries made.
    pub fn run_pending(
        &mut self,
        scheme: &mut Scheme,
        host: &mut dyn ExecutionHost,
    ) -> Result<usize> {
        let mut delivered = 0;
        while self.process_pending(scheme, host)? {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Deliver all queued signals for one node
    ///
    /// Drains and compresses the node's queued signals, clears consumed
    /// links' pending flags, re-validates dynamic links against the
    /// delivered values (a non-conforming value degrades to `None` by
    /// design, without touching the structural enabled flag), then
    /// invokes the host hook. Boundary bridge nodes are forwarded
    /// internally instead of reaching the host. Host failures propagate,
    /// but the pending flag and the `Waiting` transition are restored
    /// regardless.
    pub fn process_node(
        &mut self,
        scheme: &mut Scheme,
        host: &mut dyn ExecutionHost,
        node: NodeId,
    ) -> Result<()> {
        if self.runtime_state == RuntimeState::Processing {
            return Err(EngineError::ReentrantProcessing);
        }
        scheme.node(node).ok_or(EngineError::UnknownNode(node))?;

        let mut drained = Vec::new();
        let mut rest = Vec::with_capacity(self.queue.len());
        for signal in self.queue.drain(..) {
            if signal.sink_node == node {
                drained.push(signal);
            } else {
                rest.push(signal);
            }
        }
        self.queue = rest;
        let mut signals = compress_signals(drained);

        // Consumed links: clear pending, mark traversed.
        let mut seen: HashSet<LinkId> = HashSet::new();
        for signal in &signals {
            if !seen.insert(signal.link) {
                continue;
            }
            if let Some(link) = scheme.link(signal.link) {
                let mut state = link.state;
                state.pending = false;
                if signal.kind != SignalKind::Close {
                    state.empty = false;
                    state.active = true;
                }
                scheme.set_link_state(signal.link, state)?;
            }
        }

        // Dynamic links: per-value runtime re-validation.
        for signal in &mut signals {
            let dynamic = scheme.link(signal.link).map_or(false, |l| l.dynamic);
            if !dynamic {
                continue;
            }
            let Some(value) = signal.value.as_ref() else { continue };
            let conforms = scheme
                .node(node)
                .and_then(|n| n.input_channel(&signal.sink_channel))
                .map_or(false, |c| {
                    c.types
                        .iter()
                        .any(|t| scheme.type_registry().value_conforms(t, value))
                });
            if conforms {
                self.runtime_disabled.remove(&signal.link);
            } else {
                log::debug!(
                    "value on dynamic link {} does not conform to sink types; delivering None",
                    signal.link
                );
                signal.value = None;
                self.runtime_disabled.insert(signal.link);
            }
        }

        let bridge_channel = scheme.node(node).and_then(|n| {
            (n.is_input_bridge() || n.is_output_bridge())
                .then(|| n.bridge_channel().cloned())
                .flatten()
        });

        let result: Result<Vec<NodeOutput>> = match bridge_channel {
            Some(channel) => {
                // Boundary bridges forward values across the meta-node
                // boundary instead of reaching the host.
                let mut outcome = Ok(Vec::new());
                for signal in &signals {
                    if signal.kind == SignalKind::Close {
                        continue;
                    }
                    if let Err(err) =
                        self.send(scheme, node, &channel, signal.value.clone(), signal.id.clone())
                    {
                        outcome = Err(err);
                        break;
                    }
                }
                outcome
            }
            None => {
                self.runtime_state = RuntimeState::Processing;
                let outcome = match scheme.node(node) {
                    Some(node_ref) => host.send_to_node(scheme, node_ref, signals),
                    None => Err(EngineError::UnknownNode(node)),
                };
                self.runtime_state = RuntimeState::Waiting;
                outcome
            }
        };

        // Guaranteed cleanup regardless of the hook's outcome.
        let still_pending = self.is_pending(node);
        self.mark_pending(scheme, node, still_pending)?;

        let produced = result?;
        for output in produced {
            self.send(scheme, node, &output.channel, output.value, output.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_scheme::{
        InputChannel, LoopPolicy, Node, NodeDescription, OutputChannel, SchemeBuilder,
        VecEventSink,
    };
    use serde_json::json;

    /// Test host recording deliveries and returning scripted outputs
    #[derive(Default)]
    struct RecordingHost {
        delivered: Vec<(NodeId, Vec<Signal>)>,
        scripted: HashMap<NodeId, Vec<NodeOutput>>,
        blocking: HashSet<NodeId>,
        failing: HashSet<NodeId>,
    }

    impl ExecutionHost for RecordingHost {
        fn send_to_node(
            &mut self,
            _scheme: &Scheme,
            node: &Node,
            signals: Vec<Signal>,
        ) -> Result<Vec<NodeOutput>> {
            self.delivered.push((node.id, signals));
            if self.failing.contains(&node.id) {
                return Err(EngineError::host("node computation failed"));
            }
            Ok(self.scripted.get(&node.id).cloned().unwrap_or_default())
        }

        fn is_blocking(&self, node: &Node) -> bool {
            self.blocking.contains(&node.id)
        }
    }

    fn chain(names: &[&str]) -> (Scheme, Vec<NodeId>) {
        let mut builder = SchemeBuilder::new("wf");
        for name in names {
            builder = builder.node(name, &[("in", &["any"])], &[("out", &["any"])]);
        }
        for pair in names.windows(2) {
            builder = builder.link(pair[0], "out", pair[1], "in");
        }
        let (scheme, ids) = builder.build().unwrap();
        let ids = names.iter().map(|n| ids[*n]).collect();
        (scheme, ids)
    }

    #[test]
    fn test_send_enqueues_one_new_signal() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();

        manager
            .send(&mut scheme, a, "out", Some(json!(5)), None)
            .unwrap();

        let pending = manager.pending_input_signals(b);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, SignalKind::New);
        assert_eq!(pending[0].value, Some(json!(5)));
        assert_eq!(pending[0].index, 0);
        assert!(manager.is_pending(b));
        assert!(scheme.node(b).unwrap().state.pending);
        let link = scheme.all_links().next().unwrap();
        assert!(link.state.pending);
    }

    #[test]
    fn test_delivery_clears_pending() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager
            .send(&mut scheme, a, "out", Some(json!(5)), None)
            .unwrap();
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());

        assert_eq!(host.delivered.len(), 1);
        let (node, signals) = &host.delivered[0];
        assert_eq!(*node, b);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].value, Some(json!(5)));
        assert!(!manager.is_pending(b));
        assert!(!scheme.node(b).unwrap().state.pending);
        let link = scheme.all_links().next().unwrap();
        assert!(!link.state.pending);
        assert!(link.state.active);
        assert!(!link.state.empty);
    }

    #[test]
    fn test_second_send_is_update_and_compresses() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.send(&mut scheme, a, "out", Some(json!(2)), None).unwrap();
        manager.send(&mut scheme, a, "out", Some(json!(3)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();

        // One New followed by the collapsed latest Update.
        let (_, signals) = &host.delivered[0];
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].kind, SignalKind::New);
        assert_eq!(signals[0].value, Some(json!(1)));
        assert_eq!(signals[1].kind, SignalKind::Update);
        assert_eq!(signals[1].value, Some(json!(3)));
        let _ = b;
    }

    #[test]
    fn test_front_excludes_downstream_of_pending() {
        let (mut scheme, ids) = chain(&["a", "b", "c"]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let mut manager = SignalManager::default();
        let host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.send(&mut scheme, b, "out", Some(json!(2)), None).unwrap();

        // b and c are pending; c is downstream of pending b.
        let front = manager.node_update_front(&scheme, &host);
        assert_eq!(front, vec![b]);
        let _ = c;
    }

    #[test]
    fn test_invalidation_gates_and_send_clears() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.invalidate(&mut scheme, a, "out").unwrap();

        assert!(manager.has_invalidated_outputs(a));
        assert!(scheme.all_links().next().unwrap().state.invalidated);
        assert!(manager.node_update_front(&scheme, &host).is_empty());

        manager.send(&mut scheme, a, "out", Some(json!(2)), None).unwrap();
        assert!(!manager.has_invalidated_outputs(a));
        assert!(!scheme.all_links().next().unwrap().state.invalidated);
        assert_eq!(manager.node_update_front(&scheme, &host), vec![b]);
    }

    #[test]
    fn test_blocking_ancestor_gates_dependents() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        host.blocking.insert(a);
        assert!(manager.node_update_front(&scheme, &host).is_empty());

        host.blocking.remove(&a);
        assert_eq!(manager.node_update_front(&scheme, &host), vec![b]);
    }

    #[test]
    fn test_cycle_members_do_not_starve() {
        let (mut scheme, ids) = SchemeBuilder::new("cycle")
            .loop_policy(LoopPolicy::AllowLoops)
            .node("a", &[("in", &["any"])], &[("out", &["any"])])
            .node("b", &[("in", &["any"])], &[("out", &["any"])])
            .node("c", &[("in", &["any"])], &[("out", &["any"])])
            .link("a", "out", "b", "in")
            .link("b", "out", "c", "in")
            .link("c", "out", "a", "in")
            .build()
            .unwrap();
        let (a, b, c) = (ids["a"], ids["b"], ids["c"]);
        let mut manager = SignalManager::default();
        let host = RecordingHost::default();

        let node_ids: Vec<NodeId> = scheme.all_nodes().map(|n| n.id).collect();
        let components = strongly_connected_components(&node_ids, |n| {
            scheme.node_dependents_enabled(*n)
        });
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 3);

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.send(&mut scheme, b, "out", Some(json!(2)), None).unwrap();
        manager.send(&mut scheme, c, "out", Some(json!(3)), None).unwrap();

        // All three are pending inside one component; the same-component
        // exemption keeps every one of them eligible.
        let front = manager.node_update_front(&scheme, &host);
        assert_eq!(front.len(), 3);
    }

    #[test]
    fn test_link_added_replays_cached_value() {
        let (mut scheme, ids) = chain(&["a"]);
        let a = ids[0];
        let b = scheme
            .add_node(Node::new(
                NodeDescription::new("test.b", "b")
                    .with_inputs(vec![InputChannel::new("in", "In", &["any"])]),
            ))
            .unwrap();
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(42)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();
        assert!(host.delivered.is_empty());

        let sink = VecEventSink::new();
        scheme.add_sink(sink.clone());
        scheme.new_link(a, "out", b, "in").unwrap();
        for event in sink.drain() {
            manager.handle_event(&mut scheme, &event);
        }

        // The freshly connected sink receives the producer's last output.
        manager.run_pending(&mut scheme, &mut host).unwrap();
        assert_eq!(host.delivered.len(), 1);
        let (node, signals) = &host.delivered[0];
        assert_eq!(*node, b);
        assert_eq!(signals[0].kind, SignalKind::New);
        assert_eq!(signals[0].value, Some(json!(42)));
    }

    #[test]
    fn test_link_added_mirrors_invalidation() {
        let (mut scheme, ids) = chain(&["a"]);
        let a = ids[0];
        let b = scheme
            .add_node(Node::new(
                NodeDescription::new("test.b", "b")
                    .with_inputs(vec![InputChannel::new("in", "In", &["any"])]),
            ))
            .unwrap();
        let mut manager = SignalManager::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.invalidate(&mut scheme, a, "out").unwrap();

        let sink = VecEventSink::new();
        scheme.add_sink(sink.clone());
        let link = scheme.new_link(a, "out", b, "in").unwrap();
        for event in sink.drain() {
            manager.handle_event(&mut scheme, &event);
        }
        assert!(scheme.link(link).unwrap().state.invalidated);
    }

    #[test]
    fn test_link_removed_schedules_close() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let link = scheme.all_links().next().unwrap().id;
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();
        manager.send(&mut scheme, a, "out", Some(json!(2)), None).unwrap();

        let sink = VecEventSink::new();
        scheme.add_sink(sink.clone());
        scheme.remove_link(link).unwrap();
        for event in sink.drain() {
            manager.handle_event(&mut scheme, &event);
        }

        manager.run_pending(&mut scheme, &mut host).unwrap();
        // The queued update is absorbed; only the Close arrives.
        assert_eq!(host.delivered.len(), 2);
        let (node, signals) = &host.delivered[1];
        assert_eq!(*node, b);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Close);
        assert_eq!(signals[0].value, None);
    }

    #[test]
    fn test_node_removed_purges_queue_and_cache() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        assert!(manager.is_pending(b));

        let sink = VecEventSink::new();
        scheme.add_sink(sink.clone());
        scheme.remove_node(b).unwrap();
        scheme.remove_node(a).unwrap();
        for event in sink.drain() {
            manager.handle_event(&mut scheme, &event);
        }

        assert!(!manager.is_pending(b));
        assert!(manager.pending_nodes().is_empty());
        assert!(manager.cached_output(a, "out", None).is_none());
    }

    #[test]
    fn test_disabled_link_gets_no_signal() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let link = scheme.all_links().next().unwrap().id;
        scheme.set_link_enabled(link, false).unwrap();
        let mut manager = SignalManager::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        assert!(!manager.is_pending(b));
    }

    #[test]
    fn test_dynamic_link_degrades_to_none() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut scheme, ids) = SchemeBuilder::new("wf")
            .raw_node(
                "a",
                Node::new(
                    NodeDescription::new("test.a", "a")
                        .with_outputs(vec![OutputChannel::new("out", "Out", &["any"]).dynamic()]),
                ),
            )
            .raw_node(
                "b",
                Node::new(
                    NodeDescription::new("test.b", "b")
                        .with_inputs(vec![InputChannel::new("in", "In", &["int"])]),
                ),
            )
            .link("a", "out", "b", "in")
            .build()
            .unwrap();
        let (a, b) = (ids["a"], ids["b"]);
        let link = scheme.all_links().next().unwrap().id;
        assert!(scheme.link(link).unwrap().dynamic);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        // A conforming value passes through unchanged.
        manager.send(&mut scheme, a, "out", Some(json!(3)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();
        assert_eq!(host.delivered[0].1[0].value, Some(json!(3)));
        assert!(!manager.is_runtime_disabled(link));

        // A non-conforming value degrades to None; the structural enabled
        // flag is untouched.
        manager
            .send(&mut scheme, a, "out", Some(json!("oops")), None)
            .unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();
        assert_eq!(host.delivered[1].0, b);
        assert_eq!(host.delivered[1].1[0].value, None);
        assert!(manager.is_runtime_disabled(link));
        assert!(scheme.link(link).unwrap().enabled);

        // A later conforming value re-enables delivery.
        manager.send(&mut scheme, a, "out", Some(json!(7)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();
        assert_eq!(host.delivered[2].1[0].value, Some(json!(7)));
        assert!(!manager.is_runtime_disabled(link));
    }

    #[test]
    fn test_active_node_preferred_and_cap_gates_fresh_starts() {
        let (mut scheme, left) = chain(&["a", "b"]);
        let c = scheme
            .add_node(Node::new(
                NodeDescription::new("test.c", "c")
                    .with_outputs(vec![OutputChannel::new("out", "Out", &["any"])]),
            ))
            .unwrap();
        let d = scheme
            .add_node(Node::new(
                NodeDescription::new("test.d", "d")
                    .with_inputs(vec![InputChannel::new("in", "In", &["any"])]),
            ))
            .unwrap();
        scheme.new_link(c, "out", d, "in").unwrap();
        let (a, b) = (left[0], left[1]);
        let mut manager = SignalManager::default().with_max_active(1);
        let mut host = RecordingHost::default();

        // b is mid-execution from the host's perspective.
        let mut state = scheme.node(b).unwrap().state;
        state.running = true;
        scheme.set_node_state(b, state).unwrap();

        manager.send(&mut scheme, c, "out", Some(json!(1)), None).unwrap();
        manager.send(&mut scheme, a, "out", Some(json!(2)), None).unwrap();

        // d arrived first, but active b is preferred.
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());
        assert_eq!(host.delivered[0].0, b);

        // With one node active and the cap at 1, no fresh start is allowed.
        assert!(!manager.process_pending(&mut scheme, &mut host).unwrap());
        assert!(manager.is_pending(d));

        // Once b finishes, d gets its turn.
        let mut state = scheme.node(b).unwrap().state;
        state.running = false;
        scheme.set_node_state(b, state).unwrap();
        manager.post_update_request();
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());
        assert_eq!(host.delivered[1].0, d);
    }

    #[test]
    fn test_not_ready_node_is_skipped() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        let mut state = scheme.node(b).unwrap().state;
        state.not_ready = true;
        scheme.set_node_state(b, state).unwrap();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        assert!(!manager.process_pending(&mut scheme, &mut host).unwrap());
        assert!(manager.is_pending(b));

        let mut state = scheme.node(b).unwrap().state;
        state.not_ready = false;
        scheme.set_node_state(b, state).unwrap();
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());
    }

    #[test]
    fn test_pause_tracks_but_does_not_deliver() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let a = ids[0];
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.pause();
        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        assert!(!manager.process_pending(&mut scheme, &mut host).unwrap());
        assert!(host.delivered.is_empty());
        assert_eq!(manager.pending_nodes().len(), 1);

        manager.resume();
        assert_eq!(manager.state(), State::Running);
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());
        assert_eq!(host.delivered.len(), 1);
    }

    #[test]
    fn test_stop_halts_scheduling() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let a = ids[0];
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.stop();
        assert!(!manager.process_pending(&mut scheme, &mut host).unwrap());
        // resume() does not revive a stopped manager; start() does.
        manager.resume();
        assert_eq!(manager.state(), State::Stopped);
        manager.start();
        assert!(manager.process_pending(&mut scheme, &mut host).unwrap());
    }

    #[test]
    fn test_reentrant_processing_is_an_error() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let b = ids[1];
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();

        manager.runtime_state = RuntimeState::Processing;
        let err = manager.process_node(&mut scheme, &mut host, b).unwrap_err();
        assert!(matches!(err, EngineError::ReentrantProcessing));

        // process_pending defers instead of erroring.
        assert!(!manager.process_pending(&mut scheme, &mut host).unwrap());
        assert!(manager.update_requested());
    }

    #[test]
    fn test_host_failure_restores_bookkeeping() {
        let (mut scheme, ids) = chain(&["a", "b"]);
        let (a, b) = (ids[0], ids[1]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();
        host.failing.insert(b);

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        let err = manager.process_pending(&mut scheme, &mut host).unwrap_err();
        assert!(matches!(err, EngineError::Host(_)));

        // Cleanup ran despite the failure.
        assert_eq!(manager.runtime_state(), RuntimeState::Waiting);
        assert!(!manager.is_pending(b));
        assert!(!scheme.node(b).unwrap().state.pending);
    }

    #[test]
    fn test_scripted_outputs_flow_downstream() {
        let (mut scheme, ids) = chain(&["a", "b", "c"]);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();
        host.scripted
            .insert(b, vec![NodeOutput::new("out", Some(json!(10)))]);

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();

        // b ran and its output reached c.
        assert_eq!(host.delivered.len(), 2);
        assert_eq!(host.delivered[0].0, b);
        assert_eq!(host.delivered[1].0, c);
        assert_eq!(host.delivered[1].1[0].value, Some(json!(10)));
    }

    #[test]
    fn test_values_flow_through_meta_boundaries() {
        let mut scheme = Scheme::new("macro-flow");
        let a = scheme
            .add_node(Node::new(
                NodeDescription::new("test.a", "a")
                    .with_outputs(vec![OutputChannel::new("out", "Out", &["any"])]),
            ))
            .unwrap();
        let meta = scheme.add_node(Node::meta("Macro")).unwrap();
        let bridge_in = scheme
            .create_input_node(meta, InputChannel::new("data", "Data", &["any"]))
            .unwrap();
        let inner = scheme
            .add_node_to(
                meta,
                Node::new(
                    NodeDescription::new("test.inner", "inner")
                        .with_inputs(vec![InputChannel::new("in", "In", &["any"])])
                        .with_outputs(vec![OutputChannel::new("out", "Out", &["any"])]),
                ),
            )
            .unwrap();
        let bridge_out = scheme
            .create_output_node(meta, OutputChannel::new("result", "Result", &["any"]))
            .unwrap();
        let z = scheme
            .add_node(Node::new(
                NodeDescription::new("test.z", "z")
                    .with_inputs(vec![InputChannel::new("in", "In", &["any"])]),
            ))
            .unwrap();
        scheme.new_link(a, "out", meta, "data").unwrap();
        scheme.new_link(bridge_in, "data", inner, "in").unwrap();
        scheme.new_link(inner, "out", bridge_out, "result").unwrap();
        scheme.new_link(meta, "result", z, "in").unwrap();

        let mut manager = SignalManager::default();
        let mut host = RecordingHost::default();
        host.scripted
            .insert(inner, vec![NodeOutput::new("out", Some(json!("through")))]);

        manager
            .send(&mut scheme, a, "out", Some(json!("payload")), None)
            .unwrap();
        manager.run_pending(&mut scheme, &mut host).unwrap();

        // Bridges forwarded internally; the host saw only real nodes.
        let delivered_nodes: Vec<NodeId> = host.delivered.iter().map(|(n, _)| *n).collect();
        assert_eq!(delivered_nodes, vec![inner, z]);
        assert_eq!(host.delivered[0].1[0].value, Some(json!("payload")));
        assert_eq!(host.delivered[1].1[0].value, Some(json!("through")));
    }

    #[test]
    fn test_signal_index_disambiguates_inputs() {
        let (mut scheme, ids) = SchemeBuilder::new("wf")
            .node("a", &[], &[("out", &["any"])])
            .node("b", &[], &[("out", &["any"])])
            .node("c", &[("in", &["any"])], &[])
            .link("a", "out", "c", "in")
            .link("b", "out", "c", "in")
            .build()
            .unwrap();
        let (a, b, c) = (ids["a"], ids["b"], ids["c"]);
        let mut manager = SignalManager::default();

        manager.send(&mut scheme, a, "out", Some(json!(1)), None).unwrap();
        manager.send(&mut scheme, b, "out", Some(json!(2)), None).unwrap();

        let signals = manager.pending_input_signals(c);
        assert_eq!(signals[0].index, 0);
        assert_eq!(signals[1].index, 1);
    }
}
