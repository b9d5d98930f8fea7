// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The trace/span/resource/scope data model consumed and produced by this
//! processor.

use std::fmt;

use crate::attribute::{AttributeMap, AttributeValue};
use crate::resource_hash::ResourceHash;

/// A 16-byte trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub [u8; 16]);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// An 8-byte span identifier. All-zero denotes "no parent" (a root span).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    pub const EMPTY: SpanId = SpanId([0u8; 8]);

    pub fn is_empty(&self) -> bool {
        *self == SpanId::EMPTY
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The kind of a span, as recognized by the service-boundary rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    /// `Unspecified` normalizes to `Internal` (spec §4.3).
    pub fn normalized(self) -> SpanKind {
        match self {
            SpanKind::Unspecified => SpanKind::Internal,
            other => other,
        }
    }

    /// Entry-point kinds represent an inbound request or message at a
    /// service: `Server` and `Consumer`.
    pub fn is_entry_point(self) -> bool {
        matches!(self.normalized(), SpanKind::Server | SpanKind::Consumer)
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpanKind::Unspecified => "UNSPECIFIED",
            SpanKind::Internal => "INTERNAL",
            SpanKind::Server => "SERVER",
            SpanKind::Client => "CLIENT",
            SpanKind::Producer => "PRODUCER",
            SpanKind::Consumer => "CONSUMER",
        };
        f.write_str(s)
    }
}

/// An attribute map identifying the producer (service).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    pub attributes: AttributeMap,
}

/// An attribute map identifying the instrumentation library, preserved
/// verbatim through flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    pub name: String,
    pub version: String,
}

/// A timed event recorded on a span (e.g. an exception).
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: u64,
    pub attributes: AttributeMap,
}

/// A span as buffered by the processor: a defensive copy of the upstream
/// span together with its owning resource's attributes, its scope identity,
/// and its precomputed resource hash. Immutable post-insert until flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: SpanId,
    pub name: String,
    pub kind: SpanKind,
    pub start_timestamp: u64,
    pub attributes: AttributeMap,
    pub events: Vec<SpanEvent>,
    pub resource: Resource,
    pub scope: Scope,
    pub resource_hash: ResourceHash,
}

impl Span {
    pub fn has_parent(&self) -> bool {
        !self.parent_span_id.is_empty()
    }

    pub fn set_attribute(&mut self, key: &str, value: AttributeValue) {
        self.attributes.insert(key.to_string(), value);
    }

    pub fn get_attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// Well-known attribute keys written by this processor.
pub mod attr_keys {
    pub const SUBTRACE_ID: &str = "subtrace.id";
    pub const SUBTRACE_IS_ROOT_SPAN: &str = "subtrace.is_root_span";
    pub const SOURCE_SPAN_ID: &str = "source_span_id";
}
