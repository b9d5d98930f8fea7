// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The trace batch shape exchanged with the opaque upstream/downstream
//! collaborators, and the trait seams they're injected through.
//!
//! The upstream receiver and downstream consumer are out of scope for this
//! crate (spec §1): they are represented here only as the minimal trait a
//! test double or a real pipeline adapter must implement.

use async_trait::async_trait;

use crate::error::ForwardError;
use crate::model::{Resource, Scope, Span};

/// A batch of spans grouped by resource and scope, the shape both the
/// upstream receiver and downstream consumer exchange with this processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceBatch {
    pub resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSpans {
    pub resource: Resource,
    pub scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeSpans {
    pub scope: Scope,
    pub spans: Vec<Span>,
}

impl TraceBatch {
    /// Iterate every span in the batch together with its resource and scope.
    pub fn iter_spans(&self) -> impl Iterator<Item = (&Resource, &Scope, &Span)> {
        self.resource_spans.iter().flat_map(|rs| {
            rs.scope_spans
                .iter()
                .flat_map(move |ss| ss.spans.iter().map(move |s| (&rs.resource, &ss.scope, s)))
        })
    }

    /// Build a batch with a single resource and scope entry wrapping `spans`,
    /// as required by the downstream contract (spec §6): "each flushed
    /// subtrace becomes exactly one batch with a single resource entry ...
    /// and a single scope entry".
    pub fn single(resource: Resource, scope: Scope, spans: Vec<Span>) -> TraceBatch {
        TraceBatch {
            resource_spans: vec![ResourceSpans {
                resource,
                scope_spans: vec![ScopeSpans { scope, spans }],
            }],
        }
    }
}

/// Opaque request-scoped context threaded through to the downstream call.
/// A real pipeline would carry deadlines/baggage here; this processor never
/// inspects it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context;

/// The downstream collaborator this processor forwards enriched batches to.
#[async_trait]
pub trait TraceForwarder: Send + Sync {
    async fn forward(&self, ctx: &Context, batch: TraceBatch) -> Result<(), ForwardError>;
}
