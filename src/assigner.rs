// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The subtrace assignment algorithm: partitions a trace's buffered spans
//! into service-boundary-respecting subtraces and picks a stable root for
//! each (spec §4.3).

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::model::{Span, TraceId};

/// A subtrace produced by [`assign`]: an ordered subset of a trace's spans,
/// a generated id, and the index (within `members`) of the chosen root.
#[derive(Debug, Clone)]
pub struct Subtrace {
    pub id: String,
    pub trace_id: TraceId,
    /// Members in original buffer insertion order.
    pub members: Vec<Span>,
    pub root_index: usize,
}

impl Subtrace {
    pub fn root(&self) -> &Span {
        &self.members[self.root_index]
    }
}

fn subtrace_id(trace_id: TraceId, counter: u64) -> String {
    let input = format!("{trace_id}:{counter}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Visiting,
    Done(usize),
}

/// Partition `spans` (already in original buffer insertion order) into
/// subtraces. Every input span belongs to exactly one output subtrace
/// (spec invariant, §3).
pub fn assign(trace_id: TraceId, spans: Vec<Span>) -> Vec<Subtrace> {
    let span_by_id: HashMap<_, _> = spans
        .iter()
        .enumerate()
        .map(|(i, s)| (s.span_id, i))
        .collect();

    let mut state: HashMap<usize, Resolution> = HashMap::with_capacity(spans.len());
    let mut group_ids: Vec<String> = Vec::new();
    let mut counter: u64 = 0;

    // First pass: resolve each span's group index via memoized recursion
    // over the parent chain, respecting the service-boundary rule.
    for i in 0..spans.len() {
        resolve(i, &spans, &span_by_id, &mut state, &mut group_ids, &mut counter, trace_id);
    }

    // Second pass: materialize member lists in original insertion order
    // (the recursion above may visit parents before children regardless of
    // their buffer order, so member order must be rebuilt here rather than
    // recorded during resolution).
    let num_groups = group_ids.len();
    let mut members_by_group: Vec<Vec<Span>> = (0..num_groups).map(|_| Vec::new()).collect();
    let mut first_index_by_group: Vec<Option<usize>> = vec![None; num_groups];
    for (i, span) in spans.into_iter().enumerate() {
        let group_idx = match state.get(&i) {
            Some(Resolution::Done(g)) => *g,
            _ => unreachable!("every span is resolved in the first pass"),
        };
        first_index_by_group[group_idx].get_or_insert(i);
        members_by_group[group_idx].push(span);
    }

    let mut subtraces: Vec<(usize, Subtrace)> = group_ids
        .into_iter()
        .zip(members_by_group)
        .zip(first_index_by_group)
        .filter_map(|((id, members), first_index)| {
            let first_index = first_index?;
            let root_index = select_root(trace_id, &id, &members);
            Some((first_index, Subtrace { id, trace_id, members, root_index }))
        })
        .collect();

    // Deterministic-per-flush ordering: by the original insertion index of
    // each subtrace's earliest member (spec §4.3: "implementers may sort by
    // first-span insertion index").
    subtraces.sort_by_key(|(first_index, _)| *first_index);
    subtraces.into_iter().map(|(_, st)| st).collect()
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    i: usize,
    spans: &[Span],
    span_by_id: &HashMap<crate::model::SpanId, usize>,
    state: &mut HashMap<usize, Resolution>,
    group_ids: &mut Vec<String>,
    counter: &mut u64,
    trace_id: TraceId,
) -> usize {
    if let Some(Resolution::Done(g)) = state.get(&i) {
        return *g;
    }
    state.insert(i, Resolution::Visiting);

    let span = &spans[i];
    let group_idx = if !span.has_parent() {
        open_new_group(trace_id, group_ids, counter)
    } else {
        match span_by_id.get(&span.parent_span_id) {
            None => open_new_group(trace_id, group_ids, counter),
            Some(&parent_idx) => {
                if matches!(state.get(&parent_idx), Some(Resolution::Visiting)) {
                    // Parent pointer cycle: corrupt input. Break the cycle by
                    // treating this span as an orphan rather than recursing
                    // forever.
                    warn!(trace_id = %trace_id, span_id = %span.span_id, "parent pointer cycle detected, opening a new subtrace");
                    open_new_group(trace_id, group_ids, counter)
                } else {
                    let parent_group =
                        resolve(parent_idx, spans, span_by_id, state, group_ids, counter, trace_id);
                    let parent = &spans[parent_idx];
                    let child = &spans[i];
                    let crosses_boundary = child.resource_hash != parent.resource_hash
                        || (child.kind.normalized().is_entry_point()
                            && !parent.kind.normalized().is_entry_point());
                    if crosses_boundary {
                        open_new_group(trace_id, group_ids, counter)
                    } else {
                        parent_group
                    }
                }
            }
        }
    };

    state.insert(i, Resolution::Done(group_idx));
    group_idx
}

fn open_new_group(trace_id: TraceId, group_ids: &mut Vec<String>, counter: &mut u64) -> usize {
    *counter += 1;
    group_ids.push(subtrace_id(trace_id, *counter));
    group_ids.len() - 1
}

/// Pick the root of a just-formed subtrace (spec §4.3):
/// - candidates = members with no parent, or whose parent is outside the
///   member set
/// - exactly one candidate -> it is root
/// - multiple -> earliest `start_timestamp`, ties by insertion order
/// - none (cycle) -> earliest `start_timestamp` among all members, ties by
///   insertion order
fn select_root(trace_id: TraceId, subtrace_id: &str, members: &[Span]) -> usize {
    let member_ids: HashSet<_> = members.iter().map(|s| s.span_id).collect();
    let candidates: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.has_parent() || !member_ids.contains(&s.parent_span_id))
        .map(|(i, _)| i)
        .collect();

    match candidates.len() {
        1 => candidates[0],
        0 => {
            warn!(trace_id = %trace_id, subtrace_id, "no root candidate found (cycle), falling back to earliest start_timestamp");
            earliest(members, 0..members.len())
        }
        _ => earliest(members, candidates.into_iter()),
    }
}

fn earliest(members: &[Span], candidates: impl Iterator<Item = usize>) -> usize {
    #[allow(clippy::unwrap_used)]
    candidates
        .min_by_key(|&i| (members[i].start_timestamp, i))
        .unwrap()
}
