// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! The condition expression language evaluated against span/event attribute
//! maps (spec §4.4.3):
//!
//! ```text
//! expr      := or
//! or        := and (" or " and)*
//! and       := atom (" and " atom)*
//! atom      := 'attributes["' KEY '"]' op value
//! op        := '==' | '!='
//! value     := 'nil' | '"' STR '"' | 'true' | 'false'
//! ```
//!
//! Unknown patterns evaluate permissively to `true` so a typo degrades to
//! "apply everywhere" rather than silently filtering all spans (spec §7).

use std::sync::RwLock;

use tracing::warn;

use crate::attribute::AttributeMap;

/// Evaluate `condition` against `attributes`. `None` condition always holds.
pub fn evaluate(condition: Option<&str>, attributes: &AttributeMap) -> bool {
    match condition {
        None => true,
        Some(expr) => eval_or(expr, attributes),
    }
}

fn eval_or(expr: &str, attributes: &AttributeMap) -> bool {
    split_unquoted(expr, " or ").into_iter().any(|and_expr| eval_and(and_expr, attributes))
}

fn eval_and(expr: &str, attributes: &AttributeMap) -> bool {
    split_unquoted(expr, " and ").into_iter().all(|atom| eval_atom(atom.trim(), attributes))
}

/// Split `expr` on every top-level occurrence of `sep`, treating `"..."`
/// string literals as opaque: a `sep` substring appearing inside a quoted
/// value (e.g. `attributes["msg"] == "cats and dogs"`) is never a split
/// point. Quote state toggles on every `"` byte, matching the grammar's
/// unescaped `'"' STR '"'` value form.
fn split_unquoted<'a>(expr: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let mut chars = expr.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if !in_quotes && expr[i..].starts_with(sep) {
            parts.push(&expr[start..i]);
            let sep_end = i + sep.len();
            while matches!(chars.peek(), Some(&(j, _)) if j < sep_end) {
                chars.next();
            }
            start = sep_end;
        }
    }
    parts.push(&expr[start..]);
    parts
}

fn eval_atom(atom: &str, attributes: &AttributeMap) -> bool {
    match parse_atom(atom) {
        Some((key, op, value)) => eval_parsed_atom(attributes.get(key), op, value),
        None => {
            warn_once_unparseable(atom);
            true
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value<'a> {
    Nil,
    Str(&'a str),
    Bool(bool),
}

/// Parse `attributes["KEY"] (== | !=) (nil | "STR" | true | false)`.
/// Returns `None` for anything that doesn't match the grammar exactly.
fn parse_atom(atom: &str) -> Option<(&str, Op, Value<'_>)> {
    const PREFIX: &str = "attributes[\"";
    let rest = atom.strip_prefix(PREFIX)?;
    let close = rest.find("\"]")?;
    let key = &rest[..close];
    let rest = rest[close + 2..].trim_start();

    let (op, rest) = if let Some(r) = rest.strip_prefix("==") {
        (Op::Eq, r)
    } else if let Some(r) = rest.strip_prefix("!=") {
        (Op::Ne, r)
    } else {
        return None;
    };
    let rest = rest.trim_start();

    let value = if rest == "nil" {
        Value::Nil
    } else if rest == "true" {
        Value::Bool(true)
    } else if rest == "false" {
        Value::Bool(false)
    } else if let Some(inner) = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Value::Str(inner)
    } else {
        return None;
    };

    Some((key, op, value))
}

fn eval_parsed_atom(found: Option<&crate::attribute::AttributeValue>, op: Op, value: Value) -> bool {
    match (op, value) {
        (Op::Ne, Value::Nil) => found.is_some(),
        (Op::Eq, Value::Nil) => found.is_none(),
        (Op::Eq, Value::Str(s)) => found.and_then(|v| v.as_str()) == Some(s),
        (Op::Ne, Value::Str(s)) => found.and_then(|v| v.as_str()) != Some(s),
        (Op::Eq, Value::Bool(b)) => found.and_then(|v| v.as_bool()) == Some(b),
        (Op::Ne, Value::Bool(b)) => found.and_then(|v| v.as_bool()) != Some(b),
    }
}

/// Conditions that fail to parse into a recognized pattern are logged once
/// per unique condition string per process lifetime (spec §7: "a one-shot
/// warning per unique condition is recommended"), not once per evaluated
/// span.
static WARNED_CONDITIONS: RwLock<Vec<String>> = RwLock::new(Vec::new());

fn warn_once_unparseable(atom: &str) {
    #[allow(clippy::unwrap_used)]
    {
        if WARNED_CONDITIONS.read().unwrap().iter().any(|s| s == atom) {
            return;
        }
        let mut warned = WARNED_CONDITIONS.write().unwrap();
        if warned.iter().any(|s| s == atom) {
            return;
        }
        warned.push(atom.to_string());
    }
    warn!(condition = atom, "unrecognized condition clause, evaluating as true");
}
