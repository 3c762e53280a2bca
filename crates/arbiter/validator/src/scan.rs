//! Recursive forbidden-key scan.
//!
//! Walks every mapping key (case-insensitively) and every sequence element,
//! collecting JSONPath-like locations of violations. Any hit anywhere in
//! the record is a hard failure for the caller.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Lowercase tokens that must never appear as a key at any nesting depth:
/// credentials and execution/ordering/sizing vocabulary.
pub fn forbidden_keys() -> &'static HashSet<&'static str> {
    static KEYS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    KEYS.get_or_init(|| {
        HashSet::from([
            "api_key",
            "private_key",
            "seed_phrase",
            "mnemonic",
            "password",
            "secret",
            "token",
            "execute",
            "order",
            "place_order",
            "broker",
            "trade",
            "qty",
            "size",
            "price",
            "sl",
            "tp",
            "leverage",
            "position",
            "approve",
            "reject",
            "commit",
        ])
    })
}

/// Collect the paths of all forbidden keys in `value`. An empty result
/// means the record is clean.
pub fn scan_forbidden_keys(value: &Value) -> Vec<String> {
    let mut hits = Vec::new();
    walk(value, "$", &mut hits);
    hits
}

fn walk(value: &Value, path: &str, hits: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                if forbidden_keys().contains(key.to_ascii_lowercase().as_str()) {
                    hits.push(child_path.clone());
                }
                walk(child, &child_path, hits);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                walk(child, &format!("{path}[{idx}]"), hits);
            }
        }
        _ => {}
    }
}
