// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! Error types for configuration validation, downstream forwarding, and the
//! processor's own `consume` entry point.

use std::fmt::{self, Display};

/// Returned by [`crate::config::ProcessorConfig::validate`] when the
/// configuration surface (spec §6) is invalid. Invalid config is fatal: the
/// processor must not be constructed from it.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `timeout` must be greater than zero.
    NonPositiveTimeout,
    /// `max_spans_per_trace` must be greater than zero.
    NonPositiveMaxSpansPerTrace,
    /// An attribute aggregation rule is missing a required field.
    /// The `usize` is the rule's index in `attribute_aggregations`.
    InvalidAttributeRule(usize, &'static str),
    /// An event aggregation rule is missing a required field.
    /// The `usize` is the rule's index in `event_aggregations`.
    InvalidEventRule(usize, &'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositiveTimeout => write!(f, "timeout must be greater than zero"),
            ConfigError::NonPositiveMaxSpansPerTrace => {
                write!(f, "max_spans_per_trace must be greater than zero")
            }
            ConfigError::InvalidAttributeRule(idx, reason) => {
                write!(f, "attribute_aggregations[{idx}]: {reason}")
            }
            ConfigError::InvalidEventRule(idx, reason) => {
                write!(f, "event_aggregations[{idx}]: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Returned by a [`crate::batch::TraceForwarder`] when it fails to deliver a
/// batch downstream. Opaque by design: this crate never retries (spec §7,
/// "Downstream refusal" - buffered state for that trace is already gone by
/// the time forwarding is attempted).
#[derive(Debug)]
pub struct ForwardError(pub String);

impl Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "downstream forwarding failed: {}", self.0)
    }
}

impl std::error::Error for ForwardError {}

/// Returned by [`crate::processor::Processor::consume`].
///
/// Under `error_mode = propagate`, this wraps the first downstream
/// forwarding error encountered while flushing the traces ingested by that
/// call. Under `ignore`/`silent` the error is logged (or not) and `consume`
/// always returns `Ok`.
#[derive(Debug)]
pub enum ProcessorError {
    Forward(ForwardError),
}

impl Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::Forward(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ProcessorError {}
