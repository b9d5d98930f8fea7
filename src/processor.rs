// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The processor: owns the trace buffer and the background sweeper, and
//! implements the consume → flush → forward control flow (spec §5, §6).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator;
use crate::assigner;
use crate::batch::{Context, TraceBatch, TraceForwarder};
use crate::buffer::TraceBuffer;
use crate::config::{ErrorMode, ProcessorConfig};
use crate::error::{ForwardError, ProcessorError};
use crate::model::{Resource, Scope, Span, TraceId};
use crate::worker::{Worker, WorkerHandle};

/// Sweeper tick interval (spec §5: "default tick: 1 s").
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the trace buffer, runs the background sweeper, and drives flush and
/// forward for every trace this instance sees.
pub struct Processor<F: TraceForwarder + 'static> {
    inner: Arc<Inner<F>>,
    sweeper: Option<WorkerHandle>,
}

struct Inner<F: TraceForwarder + 'static> {
    buffer: TraceBuffer,
    config: ProcessorConfig,
    forwarder: F,
}

impl<F: TraceForwarder + 'static> Processor<F> {
    /// Construct and start a processor. `config` must already have passed
    /// [`ProcessorConfig::validate`]; this is the caller's responsibility
    /// (spec §6: invalid config is fatal at the embedding layer, not here).
    pub fn new(config: ProcessorConfig, forwarder: F) -> Self {
        let buffer = TraceBuffer::new(config.max_spans_per_trace);
        let inner = Arc::new(Inner { buffer, config, forwarder });
        let sweeper = WorkerHandle::spawn(Sweeper { inner: inner.clone() });
        Processor { inner, sweeper: Some(sweeper) }
    }

    /// Ingest a batch of spans (spec §6, upstream contract). Spans are
    /// deep-copied into the buffer; no reference into `batch` is held after
    /// this call returns. Any trace whose buffered span count just reached
    /// `max_spans_per_trace` is flushed inline before this call returns.
    pub async fn consume(&self, ctx: &Context, batch: TraceBatch) -> Result<(), ProcessorError> {
        let mut to_flush: Vec<TraceId> = Vec::new();
        for (resource, scope, span) in batch.iter_spans() {
            let trace_id = span.trace_id;
            let mut entry = span.clone();
            entry.resource = resource.clone();
            entry.scope = scope.clone();
            if self.inner.buffer.add(trace_id, entry) {
                to_flush.push(trace_id);
            }
        }

        let mut first_error = None;
        for trace_id in to_flush {
            if let Err(err) = flush_trace(&self.inner, ctx, trace_id).await {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match (self.inner.config.error_mode, first_error) {
            (_, None) => Ok(()),
            (ErrorMode::Propagate, Some(err)) => Err(ProcessorError::Forward(err)),
            (ErrorMode::Ignore | ErrorMode::Silent, Some(_)) => Ok(()),
        }
    }

    /// Stop the sweeper and drain every trace still buffered through the
    /// normal flush path (spec §5: "close the sweeper, join it, then drain
    /// every trace id still in the buffer"). Forwarding errors encountered
    /// during drain are never propagated: there is no caller left to
    /// propagate them to. Whether they are logged still follows
    /// `error_mode` (`silent` suppresses here too).
    pub async fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        let ctx = Context;
        for trace_id in self.inner.buffer.all_trace_ids() {
            if let Err(err) = flush_trace(&self.inner, &ctx, trace_id).await {
                if self.inner.config.error_mode != ErrorMode::Silent {
                    error!(trace_id = %trace_id, error = %err, "forward failed during shutdown drain");
                }
            }
        }
    }
}

struct Sweeper<F: TraceForwarder + 'static> {
    inner: Arc<Inner<F>>,
}

impl<F: TraceForwarder + 'static> Worker for Sweeper<F> {
    async fn run(&mut self, stop: CancellationToken) {
        let ctx = Context;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    let expired = self.inner.buffer.expired_trace_ids(self.inner.config.timeout);
                    for trace_id in expired {
                        if let Err(err) = flush_trace(&self.inner, &ctx, trace_id).await {
                            if self.inner.config.error_mode != ErrorMode::Silent {
                                error!(trace_id = %trace_id, error = %err, "forward failed during sweep flush");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Remove `trace_id` from the buffer (the linearization point, spec §5),
/// then partition, aggregate, label and forward its spans. A trace id no
/// longer present (e.g. already flushed by a racing sweep) is a silent
/// success - not an error (spec §4.1, "Failure modes").
async fn flush_trace<F: TraceForwarder>(
    inner: &Inner<F>,
    ctx: &Context,
    trace_id: TraceId,
) -> Result<(), ForwardError> {
    let Some(state) = inner.buffer.remove_trace(trace_id) else {
        debug!(trace_id = %trace_id, "trace already flushed, skipping");
        return Ok(());
    };

    let mut subtraces = assigner::assign(trace_id, state.spans);
    for subtrace in &mut subtraces {
        aggregator::aggregate(subtrace, &inner.config.attribute_aggregations, &inner.config.event_aggregations);
        aggregator::label(subtrace);
    }

    for subtrace in subtraces {
        let (resource, scope) = {
            let root = subtrace.root();
            (root.resource.clone(), root.scope.clone())
        };
        let batch = to_batch(resource, scope, subtrace.members);
        info!(trace_id = %trace_id, subtrace_id = %subtrace.id, span_count = batch.iter_spans().count(), "flushed subtrace");
        if let Err(err) = inner.forwarder.forward(ctx, batch).await {
            if inner.config.error_mode != ErrorMode::Silent {
                warn!(trace_id = %trace_id, subtrace_id = %subtrace.id, error = %err, "downstream refused subtrace");
            }
            return Err(err);
        }
    }
    Ok(())
}

fn to_batch(resource: Resource, scope: Scope, spans: Vec<Span>) -> TraceBatch {
    TraceBatch::single(resource, scope, spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::rules::{AttributeAggregation, AttributeRule};
    use crate::model::{SpanId, SpanKind};
    use crate::resource_hash::ResourceHash;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::advance;

    #[derive(Default)]
    struct SpyForwarder {
        batches: Mutex<Vec<TraceBatch>>,
    }

    #[async_trait]
    impl TraceForwarder for SpyForwarder {
        async fn forward(&self, _ctx: &Context, batch: TraceBatch) -> Result<(), ForwardError> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    struct FailingForwarder;

    #[async_trait]
    impl TraceForwarder for FailingForwarder {
        async fn forward(&self, _ctx: &Context, _batch: TraceBatch) -> Result<(), ForwardError> {
            Err(ForwardError("refused".to_string()))
        }
    }

    fn hash_for(service: &str) -> ResourceHash {
        let mut attrs = crate::attribute::AttributeMap::new();
        attrs.insert("service.name".to_string(), crate::attribute::AttributeValue::from(service));
        ResourceHash::of(&attrs)
    }

    fn test_span(trace_id: TraceId, id: u8, parent: u8, kind: SpanKind, service: &str) -> Span {
        Span {
            trace_id,
            span_id: SpanId([id; 8]),
            parent_span_id: if parent == 0 { SpanId::EMPTY } else { SpanId([parent; 8]) },
            name: "op".into(),
            kind,
            start_timestamp: id as u64,
            attributes: Default::default(),
            events: Vec::new(),
            resource: Resource::default(),
            scope: Scope::default(),
            resource_hash: hash_for(service),
        }
    }

    fn batch_of(spans: Vec<Span>) -> TraceBatch {
        TraceBatch::single(Resource::default(), Scope::default(), spans)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inline_flush_triggers_on_size_cap() {
        let forwarder = Arc::new(SpyForwarder::default());
        let config = ProcessorConfig {
            max_spans_per_trace: 2,
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, ForwardingProxy(forwarder.clone()));
        let trace_id = TraceId([1; 16]);
        let batch = batch_of(vec![
            test_span(trace_id, 1, 0, SpanKind::Server, "A"),
            test_span(trace_id, 2, 1, SpanKind::Internal, "A"),
        ]);
        processor.consume(&Context, batch).await.unwrap();
        assert_eq!(forwarder.batches.lock().unwrap().len(), 1);
        processor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", start_paused = true)]
    async fn sweeper_flushes_after_timeout() {
        let forwarder = Arc::new(SpyForwarder::default());
        let config = ProcessorConfig {
            timeout: Duration::from_secs(5),
            max_spans_per_trace: 1000,
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, ForwardingProxy(forwarder.clone()));
        let trace_id = TraceId([2; 16]);
        let batch = batch_of(vec![test_span(trace_id, 1, 0, SpanKind::Server, "A")]);
        processor.consume(&Context, batch).await.unwrap();
        assert!(forwarder.batches.lock().unwrap().is_empty());

        // Step the paused clock forward past the 5s timeout in small
        // increments, yielding in between so the sweeper's spawned task
        // gets scheduled and observes each tick.
        for _ in 0..8 {
            advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(forwarder.batches.lock().unwrap().len(), 1);
        processor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_drains_remaining_traces() {
        let forwarder = Arc::new(SpyForwarder::default());
        let config = ProcessorConfig {
            timeout: Duration::from_secs(3600),
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, ForwardingProxy(forwarder.clone()));
        let trace_id = TraceId([3; 16]);
        let batch = batch_of(vec![test_span(trace_id, 1, 0, SpanKind::Server, "A")]);
        processor.consume(&Context, batch).await.unwrap();
        processor.shutdown().await;
        assert_eq!(forwarder.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn propagate_mode_surfaces_forward_error() {
        let config = ProcessorConfig {
            max_spans_per_trace: 1,
            error_mode: ErrorMode::Propagate,
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, FailingForwarder);
        let trace_id = TraceId([4; 16]);
        let batch = batch_of(vec![test_span(trace_id, 1, 0, SpanKind::Server, "A")]);
        let result = processor.consume(&Context, batch).await;
        assert!(matches!(result, Err(ProcessorError::Forward(_))));
        processor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ignore_mode_swallows_forward_error() {
        let config = ProcessorConfig {
            max_spans_per_trace: 1,
            error_mode: ErrorMode::Ignore,
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, FailingForwarder);
        let trace_id = TraceId([5; 16]);
        let batch = batch_of(vec![test_span(trace_id, 1, 0, SpanKind::Server, "A")]);
        let result = processor.consume(&Context, batch).await;
        assert!(result.is_ok());
        processor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn silent_mode_swallows_forward_error_without_propagating() {
        let config = ProcessorConfig {
            max_spans_per_trace: 1,
            error_mode: ErrorMode::Silent,
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, FailingForwarder);
        let trace_id = TraceId([9; 16]);
        let batch = batch_of(vec![test_span(trace_id, 1, 0, SpanKind::Server, "A")]);
        let result = processor.consume(&Context, batch).await;
        assert!(result.is_ok());
        processor.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn consume_applies_aggregation_rules_on_inline_flush() {
        let forwarder = Arc::new(SpyForwarder::default());
        let config = ProcessorConfig {
            max_spans_per_trace: 3,
            attribute_aggregations: vec![AttributeRule {
                aggregation: AttributeAggregation::Count,
                source: None,
                condition: None,
                target: "subtrace.child_count".to_string(),
                max_values: 100,
            }],
            ..ProcessorConfig::default()
        };
        let processor = Processor::new(config, ForwardingProxy(forwarder.clone()));
        let trace_id = TraceId([6; 16]);
        let batch = batch_of(vec![
            test_span(trace_id, 1, 0, SpanKind::Server, "A"),
            test_span(trace_id, 2, 1, SpanKind::Internal, "A"),
            test_span(trace_id, 3, 1, SpanKind::Internal, "A"),
        ]);
        processor.consume(&Context, batch).await.unwrap();
        let batches = forwarder.batches.lock().unwrap();
        let root_span = batches[0]
            .iter_spans()
            .map(|(_, _, s)| s)
            .find(|s| s.span_id == SpanId([1; 8]))
            .unwrap();
        assert_eq!(
            root_span.get_attribute("subtrace.child_count"),
            Some(&crate::attribute::AttributeValue::Int(2))
        );
        processor.shutdown().await;
    }

    /// Adapts an `Arc<SpyForwarder>`/`Arc<FailingForwarder>`-style spy so the
    /// same spy instance can be asserted on after being moved into a
    /// `Processor`.
    struct ForwardingProxy<T>(Arc<T>);

    #[async_trait]
    impl<T: TraceForwarder> TraceForwarder for ForwardingProxy<T> {
        async fn forward(&self, ctx: &Context, batch: TraceBatch) -> Result<(), ForwardError> {
            self.0.forward(ctx, batch).await
        }
    }
}
