//! Link validation: the single authority consulted by every insertion path
//!
//! [`check_connect`] performs every structural check a link insertion must
//! pass: endpoint membership, channel existence, loop policy, channel type
//! compatibility, duplicate detection and the single-connection
//! constraint. Validation is side-effect free; callers mutate only after
//! it succeeds.

use std::collections::{HashSet, VecDeque};

use crate::channel::{classify_connection, Compatibility};
use crate::errors::{Result, SchemeError};
use crate::link::Link;
use crate::node::MetaNode;
use crate::registry::TypeRegistry;
use crate::types::{LoopPolicy, NodeId};

/// Whether adding `candidate` to `links` would close a cycle
///
/// Computes the ancestor set of the candidate's source by breadth-first
/// traversal backward through `links`; the candidate closes a cycle iff
/// its sink is among those ancestors. The self-loop case (sink == source)
/// is not covered here; callers check it separately.
pub fn creates_cycle(links: &[Link], candidate: &Link) -> bool {
    let mut ancestors: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(candidate.source_node);
    while let Some(current) = queue.pop_front() {
        if !ancestors.insert(current) {
            continue;
        }
        for link in links {
            if link.sink_node == current {
                queue.push_back(link.source_node);
            }
        }
    }
    ancestors.contains(&candidate.sink_node)
}

/// Validate a candidate link against a container
///
/// Both endpoints must be direct children of `container`. On success,
/// returns the connection classification (`Strict` or `Dynamic`) so the
/// caller can stamp the link's runtime-check flag.
pub fn check_connect(
    container: &MetaNode,
    candidate: &Link,
    registry: &TypeRegistry,
    policy: LoopPolicy,
) -> Result<Compatibility> {
    let source = container
        .node(candidate.source_node)
        .ok_or(SchemeError::UnknownNode(candidate.source_node))?;
    let sink = container
        .node(candidate.sink_node)
        .ok_or(SchemeError::UnknownNode(candidate.sink_node))?;

    let source_channel =
        source
            .output_channel(&candidate.source_channel)
            .ok_or_else(|| SchemeError::UnknownChannel {
                node: source.id,
                direction: "output",
                channel: candidate.source_channel.clone(),
            })?;
    let sink_channel =
        sink.input_channel(&candidate.sink_channel)
            .ok_or_else(|| SchemeError::UnknownChannel {
                node: sink.id,
                direction: "input",
                channel: candidate.sink_channel.clone(),
            })?;

    if candidate.source_node == candidate.sink_node {
        if !policy.allows_self_loops() {
            return Err(SchemeError::SelfLoop(candidate.source_node));
        }
    } else if !policy.allows_cycles() && creates_cycle(container.links(), candidate) {
        return Err(SchemeError::Cycle(candidate.sink_node));
    }

    let compatibility = classify_connection(registry, &source_channel, &sink_channel);
    if compatibility == Compatibility::None {
        return Err(SchemeError::IncompatibleChannels {
            source_channel: candidate.source_channel.clone(),
            sink_channel: candidate.sink_channel.clone(),
        });
    }

    if container.links().iter().any(|l| l.same_connection(candidate)) {
        return Err(SchemeError::DuplicateLink {
            source_channel: candidate.source_channel.clone(),
            sink_channel: candidate.sink_channel.clone(),
        });
    }

    if sink_channel.single {
        let occupied = container.links().iter().any(|l| {
            l.sink_node == candidate.sink_node
                && sink_channel.matches_id(&l.sink_channel)
        });
        if occupied {
            return Err(SchemeError::SinkChannelOccupied {
                sink_node: candidate.sink_node,
                sink_channel: candidate.sink_channel.clone(),
            });
        }
    }

    Ok(compatibility)
}
