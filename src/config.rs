// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The processor's configuration surface (spec §6), deserializable from
//! whatever format the embedding collector uses (YAML/JSON/TOML all go
//! through `serde`).

use std::time::Duration;

use serde::Deserialize;

use crate::aggregator::rules::{AttributeRule, EventRule};
use crate::error::ConfigError;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_spans_per_trace() -> usize {
    1000
}

/// What to do when a downstream forward fails (spec §7, "Downstream
/// refusal").
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Log the error and continue; `consume`/the sweeper never surface it.
    #[default]
    Ignore,
    /// Drop the error silently, not even logged. For embedders that handle
    /// forwarding failures entirely out of band.
    Silent,
    /// Surface the first forwarding error from a `consume` call to the
    /// caller, and log it same as `Ignore`. The background sweeper and
    /// shutdown drain have no caller to propagate to, so for them this
    /// behaves like `Ignore`: log and continue.
    Propagate,
}

/// Full configuration for a [`crate::processor::Processor`] (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// How long a trace may sit in the buffer with no new spans before the
    /// background sweeper flushes it (spec §5).
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Hard cap on spans buffered per trace before an inline flush is forced
    /// (spec §5).
    #[serde(default = "default_max_spans_per_trace")]
    pub max_spans_per_trace: usize,
    /// Behavior when a downstream forward fails.
    #[serde(default)]
    pub error_mode: ErrorMode,
    /// Attribute aggregation rules applied to every subtrace at flush time,
    /// in configured order (spec §4.4).
    #[serde(default)]
    pub attribute_aggregations: Vec<AttributeRule>,
    /// Event aggregation rules applied to every subtrace at flush time, in
    /// configured order (spec §4.4).
    #[serde(default)]
    pub event_aggregations: Vec<EventRule>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            timeout: default_timeout(),
            max_spans_per_trace: default_max_spans_per_trace(),
            error_mode: ErrorMode::default(),
            attribute_aggregations: Vec::new(),
            event_aggregations: Vec::new(),
        }
    }
}

impl ProcessorConfig {
    /// Validate field invariants (spec §6). A `Processor` must never be
    /// constructed from a config that fails this check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        if self.max_spans_per_trace == 0 {
            return Err(ConfigError::NonPositiveMaxSpansPerTrace);
        }
        for (i, rule) in self.attribute_aggregations.iter().enumerate() {
            rule.validate(i)?;
        }
        for (i, rule) in self.event_aggregations.iter().enumerate() {
            rule.validate(i)?;
        }
        Ok(())
    }
}
