// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Tool Signatures
//!
//! A [`ToolSignature`] identifies *what* was attempted: the operation name plus
//! its normalized parameters, hashed with SHA-256 and truncated to
//! [`FINGERPRINT_LEN`] hex characters.
//!
//! ## Normalization
//!
//! - Object keys are sorted lexicographically (recursively, so nested maps are
//!   stable too).
//! - Top-level string values are trimmed.
//! - Every other value is left untouched.
//!
//! A params value that is not an object is hashed through its string
//! representation, so hashing never fails.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 32;

/// Hash arbitrary bytes into a truncated hex fingerprint.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Deterministic fingerprint of an operation name and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSignature(String);

impl ToolSignature {
    /// Compute the signature of `tool_name` called with `params`.
    pub fn compute(tool_name: &str, params: &Value) -> Self {
        let canonical = canonical_call(tool_name, params);
        Self(fingerprint(canonical.as_bytes()))
    }

    /// Wrap an already computed signature (e.g. read back from the store).
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ToolSignature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a parameter map: sorted keys, trimmed top-level strings.
pub fn normalize_params(params: &Value) -> Value {
    match params {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut normalized = Map::new();
            for key in keys {
                let value = match &map[key] {
                    Value::String(s) => Value::String(s.trim().to_string()),
                    other => sort_keys(other),
                };
                normalized.insert(key.clone(), value);
            }
            Value::Object(normalized)
        }
        Value::String(s) => Value::String(s.trim().to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Human-readable `name(params)` rendering used in advisory reasons.
pub fn describe_call(tool_name: &str, params: &Value) -> String {
    format!("{}({})", tool_name, normalize_params(params))
}

fn canonical_call(tool_name: &str, params: &Value) -> String {
    let mut call = Map::new();
    call.insert("name".to_string(), Value::String(tool_name.to_string()));
    call.insert("params".to_string(), normalize_params(params));
    Value::Object(call).to_string()
}

// Rebuild nested objects with keys inserted in sorted order so the
// serialization is stable whatever map ordering serde_json was built with.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
