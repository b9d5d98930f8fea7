// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The aggregation engine: evaluates configured attribute/event aggregation
//! rules against a subtrace's non-root members and writes the results onto
//! the subtrace's root span (spec §4.4).

pub mod condition;
pub mod rules;

use tracing::{debug, warn};

use crate::assigner::Subtrace;
use crate::attribute::AttributeValue;
use crate::model::attr_keys;
use rules::{AttributeAggregation, AttributeRule, EventAggregation, EventRule};

/// Apply every configured rule to `subtrace`, writing matched results onto
/// its root span. The root is never itself a source for aggregation; only
/// the other members contribute (spec §4.4).
///
/// A subtrace with no successfully elected root would have nothing to write
/// to, but root selection (spec §4.3) always elects one member as root, so
/// this only ever skips work when the subtrace has a single member (itself
/// the root, with zero non-root contributors).
pub fn aggregate(subtrace: &mut Subtrace, attribute_rules: &[AttributeRule], event_rules: &[EventRule]) {
    for rule in attribute_rules {
        apply_attribute_rule(subtrace, rule);
    }
    for rule in event_rules {
        apply_event_rule(subtrace, rule);
    }
}

fn non_root_indices(subtrace: &Subtrace) -> impl Iterator<Item = usize> + '_ {
    (0..subtrace.members.len()).filter(move |&i| i != subtrace.root_index)
}

fn apply_attribute_rule(subtrace: &mut Subtrace, rule: &AttributeRule) {
    let mut matched_count: u64 = 0;
    let mut values: Vec<AttributeValue> = Vec::new();

    for i in non_root_indices(subtrace) {
        let span = &subtrace.members[i];
        if !condition::evaluate(rule.condition.as_deref(), &span.attributes) {
            continue;
        }
        matched_count += 1;
        if let Some(source) = &rule.source {
            if let Some(value) = span.get_attribute(source) {
                values.push(value.clone());
            }
        }
    }

    let result = reduce_attribute(rule, matched_count, values);
    if let Some(value) = result {
        subtrace.members[subtrace.root_index].set_attribute(&rule.target, value);
    }
}

fn reduce_attribute(rule: &AttributeRule, matched_count: u64, values: Vec<AttributeValue>) -> Option<AttributeValue> {
    match rule.aggregation {
        AttributeAggregation::Count => Some(AttributeValue::Int(matched_count as i64)),
        AttributeAggregation::Sum => reduce_sum(&values),
        AttributeAggregation::Avg => reduce_avg(&values),
        AttributeAggregation::Min => reduce_extremum(&values, |a, b| a < b),
        AttributeAggregation::Max => reduce_extremum(&values, |a, b| a > b),
        AttributeAggregation::Any => values.into_iter().next(),
        AttributeAggregation::All => {
            if values.is_empty() {
                None
            } else {
                let truncated: Vec<_> = values.into_iter().take(rule.max_values).collect();
                Some(AttributeValue::Array(truncated))
            }
        }
        AttributeAggregation::AllDistinct => reduce_all_distinct(values, rule.max_values),
    }
}

fn reduce_sum(values: &[AttributeValue]) -> Option<AttributeValue> {
    let numeric: Vec<&AttributeValue> = values.iter().filter(|v| v.as_f64().is_some()).collect();
    if numeric.is_empty() {
        return None;
    }
    let all_integral = numeric.iter().all(|v| v.is_integral());
    if all_integral {
        let total: i64 = numeric
            .iter()
            .filter_map(|v| match v {
                AttributeValue::Int(i) => Some(*i),
                _ => None,
            })
            .sum();
        Some(AttributeValue::Int(total))
    } else {
        #[allow(clippy::unwrap_used)]
        let total: f64 = numeric.iter().map(|v| v.as_f64().unwrap()).sum();
        Some(AttributeValue::Double(total))
    }
}

fn reduce_avg(values: &[AttributeValue]) -> Option<AttributeValue> {
    let numeric: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numeric.is_empty() {
        return None;
    }
    Some(AttributeValue::Double(numeric.iter().sum::<f64>() / numeric.len() as f64))
}

fn reduce_extremum(values: &[AttributeValue], better: fn(f64, f64) -> bool) -> Option<AttributeValue> {
    let mut best: Option<f64> = None;
    for v in values {
        if let Some(n) = v.as_f64() {
            best = match best {
                None => Some(n),
                Some(current) if better(n, current) => Some(n),
                Some(current) => Some(current),
            };
        }
    }
    best.map(AttributeValue::Double)
}

fn reduce_all_distinct(values: Vec<AttributeValue>, max_values: usize) -> Option<AttributeValue> {
    if values.is_empty() {
        return None;
    }
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for v in values {
        if seen.insert(v.canonical_string()) {
            out.push(v);
            if out.len() >= max_values {
                break;
            }
        }
    }
    Some(AttributeValue::Array(out))
}

fn apply_event_rule(subtrace: &mut Subtrace, rule: &EventRule) {
    // Collect (source_span_id, event) pairs first since the root (the
    // append target for copy_event) is also a member of `subtrace.members`
    // and Rust won't let us hold an immutable borrow of other members while
    // mutably borrowing the root through the same slice.
    let mut matched: Vec<(crate::model::SpanId, crate::model::SpanEvent)> = Vec::new();
    for i in non_root_indices(subtrace) {
        let span = &subtrace.members[i];
        for event in &span.events {
            if event.name != rule.source {
                continue;
            }
            if !condition::evaluate(rule.condition.as_deref(), &event.attributes) {
                continue;
            }
            matched.push((span.span_id, event.clone()));
        }
    }

    match rule.aggregation {
        EventAggregation::Count => {
            if let Some(target) = &rule.target {
                let root = &mut subtrace.members[subtrace.root_index];
                root.set_attribute(target, AttributeValue::Int(matched.len() as i64));
            } else {
                warn!("count event rule with no target; skipping write");
            }
        }
        EventAggregation::CopyEvent => {
            let root = &mut subtrace.members[subtrace.root_index];
            for (source_span_id, mut event) in matched.into_iter().take(rule.max_events) {
                event
                    .attributes
                    .insert(attr_keys::SOURCE_SPAN_ID.to_string(), AttributeValue::from(source_span_id.to_hex()));
                debug!(event = %event.name, source_span_id = %source_span_id, "copied event onto subtrace root");
                root.events.push(event);
            }
        }
    }
}

/// Label every span of a flushed subtrace with `subtrace.id`, and the root
/// span additionally with `subtrace.is_root_span=true` (spec §4.3
/// "Labeling"). Existing values are overwritten.
pub fn label(subtrace: &mut Subtrace) {
    let id = subtrace.id.clone();
    for (i, span) in subtrace.members.iter_mut().enumerate() {
        span.set_attribute(attr_keys::SUBTRACE_ID, AttributeValue::Str(id.clone()));
        if i == subtrace.root_index {
            span.set_attribute(attr_keys::SUBTRACE_IS_ROOT_SPAN, AttributeValue::Bool(true));
        }
    }
}
