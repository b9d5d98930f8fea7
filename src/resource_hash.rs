// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
//! Deterministic 64-bit fingerprint of a resource attribute map.
//!
//! Used to group spans by service within a trace: two resources hash equal
//! iff their sorted `key=value;` strings match exactly.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::attribute::AttributeMap;

/// First 8 bytes of `SHA-256(canonical resource string)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHash([u8; 8]);

impl ResourceHash {
    /// Hash a resource's attribute map.
    ///
    /// Keys are sorted ascending by byte order and rendered as `k=v;` using
    /// each value's canonical string form (`AttributeValue::canonical_string`).
    /// `AttributeMap` is a `BTreeMap`, so iteration is already key-sorted.
    pub fn of(attributes: &AttributeMap) -> Self {
        let mut canonical = String::new();
        for (key, value) in attributes {
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(&value.canonical_string());
            canonical.push(';');
        }
        let digest = Sha256::digest(canonical.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        ResourceHash(bytes)
    }
}

impl fmt::Display for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
