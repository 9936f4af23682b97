//! Signals and queue compression
//!
//! A [`Signal`] is one queued value delivery on a link. Before delivery
//! the per-node queue is compressed: stale intermediate updates are
//! dropped under ordering laws that keep `None` reset markers and
//! terminal `Close` signals intact.

use serde::{Deserialize, Serialize};

use filament_scheme::{ChannelId, LinkId, NodeId};

/// Classification of a queued delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// First value ever sent on the (channel, id) slot
    New,
    /// Replaces a previously sent value
    Update,
    /// The link was removed; the sink should release per-link state
    Close,
}

/// A queued value delivery
///
/// Routing fields are snapshotted at enqueue time so a signal stays
/// deliverable even if the link is removed before delivery. `index` is
/// the link's position among the sink node's input links when the signal
/// was enqueued, used for multi-input disambiguation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub link: LinkId,
    pub sink_node: NodeId,
    pub sink_channel: ChannelId,
    /// `None` is a reset: the source retracted its value
    pub value: Option<serde_json::Value>,
    /// Optional sub-channel identifier for multi-value outputs
    pub id: Option<String>,
    pub index: usize,
    pub kind: SignalKind,
}

/// Compress a signal queue
///
/// Signals are grouped by (link, id); groups are compressed independently
/// and surviving signals keep their original relative order. Laws:
///
/// - A run of consecutive updates collapses to the latest one, except
///   that a `None`-valued update is never silently dropped: at most the
///   two-signal pattern (`None`, latest-non-`None`) survives a run.
/// - An update immediately preceding a `Close` is dropped in favor of the
///   `Close`, except that a preserved `None` reset is kept, yielding
///   (`None`, `Close`).
///
/// The output is always a subsequence of the input, and compressing an
/// already-compressed queue is a no-op.
pub fn compress_signals(signals: Vec<Signal>) -> Vec<Signal> {
    let mut keep = vec![false; signals.len()];
    let mut groups: Vec<((LinkId, Option<String>), Vec<usize>)> = Vec::new();
    for (i, signal) in signals.iter().enumerate() {
        let key = (signal.link, signal.id.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, indices)) => indices.push(i),
            None => groups.push((key, vec![i])),
        }
    }
    for (_, indices) in &groups {
        for i in compress_group(&signals, indices) {
            keep[i] = true;
        }
    }
    signals
        .into_iter()
        .enumerate()
        .filter_map(|(i, s)| keep[i].then_some(s))
        .collect()
}

fn compress_group(signals: &[Signal], group: &[usize]) -> Vec<usize> {
    // Collapse runs of consecutive updates.
    let mut survivors: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < group.len() {
        if signals[group[i]].kind != SignalKind::Update {
            survivors.push(group[i]);
            i += 1;
            continue;
        }
        let mut j = i;
        while j < group.len() && signals[group[j]].kind == SignalKind::Update {
            j += 1;
        }
        let run = &group[i..j];
        let latest = run[run.len() - 1];
        if run.len() > 1 && signals[latest].value.is_some() {
            // Keep the most recent reset marker from the collapsed prefix.
            if let Some(&reset) = run[..run.len() - 1]
                .iter()
                .rev()
                .find(|&&k| signals[k].value.is_none())
            {
                survivors.push(reset);
            }
        }
        survivors.push(latest);
        i = j;
    }

    // Absorb updates into a following close.
    let mut out: Vec<usize> = Vec::new();
    for idx in survivors {
        if signals[idx].kind == SignalKind::Close {
            while let Some(&prev) = out.last() {
                if signals[prev].kind == SignalKind::Update && signals[prev].value.is_some() {
                    out.pop();
                } else {
                    break;
                }
            }
        }
        out.push(idx);
    }
    out
}
