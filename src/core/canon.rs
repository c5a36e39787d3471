//! Canonical JSON and SHA-256 helpers.
//!
//! Canonical form: UTF-8, object keys sorted lexicographically, no
//! whitespace, no trailing newline. Every hash in the mesh (ledger line
//! hashes, seal hashes, capsule hashes) is computed over this form so that
//! verification can recompute it byte-for-byte.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize a JSON value canonically. Keys are sorted explicitly rather
/// than relying on map ordering in `serde_json`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()))
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string()));
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn sha256_hex_str(s: &str) -> String {
    sha256_hex(s.as_bytes())
}

/// SHA-256 of the canonical JSON form of `value`.
pub fn canonical_sha256(value: &Value) -> String {
    sha256_hex_str(&canonical_json(value))
}

/// SHA-256 of the canonical form of an object with one key removed.
/// Used for self-referential hashes (`line_sha`, seal `hash`).
pub fn canonical_sha256_without(value: &Value, drop_key: &str) -> String {
    let mut stripped = value.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove(drop_key);
    }
    canonical_sha256(&stripped)
}
