// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! Configuration shapes for attribute and event aggregation rules (spec §4.4,
//! §6).

use serde::Deserialize;

use crate::error::ConfigError;

fn default_max_values() -> usize {
    100
}

fn default_max_events() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeAggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Any,
    All,
    AllDistinct,
}

/// An attribute aggregation rule: reads `source` off each non-root span that
/// matches `condition`, reduces the matched values per `aggregation`, and
/// writes the result to `target` on the subtrace root.
///
/// Two rules sharing the same `target` are not forbidden: they simply
/// overwrite in configured list order (spec §9, Open Question - not enforced
/// here, see DESIGN.md).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttributeRule {
    pub aggregation: AttributeAggregation,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    pub target: String,
    #[serde(default = "default_max_values")]
    pub max_values: usize,
}

impl AttributeRule {
    pub(crate) fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::InvalidAttributeRule(index, "target must be non-empty"));
        }
        if self.aggregation != AttributeAggregation::Count
            && self.source.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::InvalidAttributeRule(
                index,
                "source is required for all aggregations except count",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventAggregation {
    CopyEvent,
    Count,
}

/// An event aggregation rule: scans every non-root span's events for ones
/// named `source` that match `condition`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventRule {
    pub aggregation: EventAggregation,
    pub source: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl EventRule {
    pub(crate) fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.source.is_empty() {
            return Err(ConfigError::InvalidEventRule(index, "source must be non-empty"));
        }
        if self.aggregation == EventAggregation::Count
            && self.target.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::InvalidEventRule(
                index,
                "target is required for count event rules",
            ));
        }
        Ok(())
    }
}
