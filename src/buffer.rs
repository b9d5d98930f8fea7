// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The trace buffer: a concurrency-safe store mapping trace id to the spans
//! seen for it so far, fed from arbitrary concurrent producers and drained
//! by either a periodic sweep or an inline size-cap hit.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{Span, TraceId};

/// The spans buffered for a single trace, plus the time the first span for
/// that trace id arrived.
#[derive(Debug, Clone)]
pub struct TraceState {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
    pub first_seen: Instant,
}

impl TraceState {
    fn empty(trace_id: TraceId, now: Instant) -> Self {
        TraceState {
            trace_id,
            spans: Vec::new(),
            first_seen: now,
        }
    }
}

/// Bounded in-memory store mapping trace id to buffered span entries.
///
/// A single `RwLock` guards the id -> state mapping (spec §4.1/§5): inserts
/// take the write lock just long enough to push a span (and possibly create
/// a new `TraceState`); the expiry scan takes only a read lock. Neither
/// holder yields while holding the lock.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    traces: RwLock<HashMap<TraceId, TraceState>>,
    max_spans_per_trace: usize,
}

impl TraceBuffer {
    pub fn new(max_spans_per_trace: usize) -> Self {
        TraceBuffer {
            traces: RwLock::new(HashMap::new()),
            max_spans_per_trace,
        }
    }

    /// Insert a (already defensively-copied) span under `trace_id`.
    ///
    /// Returns `true` iff the trace's buffered span count has just reached
    /// `max_spans_per_trace`, signaling the caller should flush this trace
    /// immediately rather than waiting for the periodic sweep.
    ///
    /// # Panics
    /// Panics if the lock is poisoned by a prior panicking holder - this
    /// mirrors the rest of this crate family's convention of treating lock
    /// poisoning (an unrecoverable bug elsewhere) as fatal rather than
    /// silently losing data.
    pub fn add(&self, trace_id: TraceId, span: Span) -> bool {
        let now = Instant::now();
        #[allow(clippy::unwrap_used)]
        let mut traces = self.traces.write().unwrap();
        let state = traces
            .entry(trace_id)
            .or_insert_with(|| TraceState::empty(trace_id, now));
        state.spans.push(span);
        state.spans.len() >= self.max_spans_per_trace
    }

    /// Atomically remove and return the state for `trace_id`, if present.
    #[allow(clippy::unwrap_used)]
    pub fn remove_trace(&self, trace_id: TraceId) -> Option<TraceState> {
        self.traces.write().unwrap().remove(&trace_id)
    }

    /// Snapshot of trace ids whose `first_seen` is older than `now - timeout`.
    #[allow(clippy::unwrap_used)]
    pub fn expired_trace_ids(&self, timeout: Duration) -> Vec<TraceId> {
        let cutoff = Instant::now().checked_sub(timeout);
        let traces = self.traces.read().unwrap();
        traces
            .values()
            .filter(|state| match cutoff {
                Some(cutoff) => state.first_seen <= cutoff,
                // `timeout` larger than the process uptime: nothing has expired yet.
                None => false,
            })
            .map(|state| state.trace_id)
            .collect()
    }

    /// All trace ids currently buffered, used to drain the buffer on
    /// shutdown.
    #[allow(clippy::unwrap_used)]
    pub fn all_trace_ids(&self) -> Vec<TraceId> {
        self.traces.read().unwrap().keys().copied().collect()
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub(crate) fn len(&self) -> usize {
        self.traces.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, Scope, SpanId, SpanKind};
    use crate::resource_hash::ResourceHash;

    fn test_span(trace_id: TraceId, span_id: u8) -> Span {
        Span {
            trace_id,
            span_id: SpanId([span_id; 8]),
            parent_span_id: SpanId::EMPTY,
            name: "op".into(),
            kind: SpanKind::Internal,
            start_timestamp: 0,
            attributes: Default::default(),
            events: Vec::new(),
            resource: Resource::default(),
            scope: Scope::default(),
            resource_hash: ResourceHash::of(&Default::default()),
        }
    }

    #[test]
    fn add_creates_trace_and_reports_cap_hit() {
        let buffer = TraceBuffer::new(2);
        let trace_id = TraceId([1; 16]);
        assert!(!buffer.add(trace_id, test_span(trace_id, 1)));
        assert!(buffer.add(trace_id, test_span(trace_id, 2)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn remove_trace_is_atomic_take_and_delete() {
        let buffer = TraceBuffer::new(1000);
        let trace_id = TraceId([2; 16]);
        buffer.add(trace_id, test_span(trace_id, 1));
        let state = buffer.remove_trace(trace_id).expect("trace present");
        assert_eq!(state.spans.len(), 1);
        assert!(buffer.remove_trace(trace_id).is_none());
    }

    #[test]
    fn expired_trace_ids_respects_timeout() {
        let buffer = TraceBuffer::new(1000);
        let trace_id = TraceId([3; 16]);
        buffer.add(trace_id, test_span(trace_id, 1));
        assert!(buffer.expired_trace_ids(Duration::from_secs(60)).is_empty());
        assert_eq!(
            buffer.expired_trace_ids(Duration::from_secs(0)),
            vec![trace_id]
        );
    }

    #[test]
    fn all_trace_ids_lists_every_buffered_trace() {
        let buffer = TraceBuffer::new(1000);
        let a = TraceId([4; 16]);
        let b = TraceId([5; 16]);
        buffer.add(a, test_span(a, 1));
        buffer.add(b, test_span(b, 1));
        let mut ids = buffer.all_trace_ids();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
