//! Arbiter Codec - canonical JSON serialization and content digests.
//!
//! Every record in the system is identified by the SHA-256 digest of its
//! canonical form: UTF-8 compact JSON with object keys sorted
//! lexicographically at every depth. Two records canonicalize to the same
//! bytes iff they are semantically identical (key order is insignificant,
//! sequence order is significant).

#![deny(unsafe_code)]

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Hex length of a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("non-finite number cannot be encoded")]
    NonFiniteNumber,

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// A validated, lowercase-hex SHA-256 digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hash256(String);

impl Hash256 {
    /// Parse an untrusted hex string. Rejects anything that is not exactly
    /// 64 lowercase hex characters.
    pub fn parse(value: &str) -> Result<Self, CodecError> {
        if value.len() != DIGEST_HEX_LEN
            || !value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(CodecError::InvalidDigest(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 32-byte digest, for signing.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        // Cannot fail: parse() guarantees 64 hex chars.
        if let Ok(decoded) = hex::decode(&self.0) {
            out.copy_from_slice(&decoded);
        }
        out
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a record to canonical bytes: keys sorted at every nesting
/// level, compact separators, UTF-8, no trailing whitespace.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out.into_bytes())
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), CodecError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            // serde_json numbers cannot hold NaN/Infinity; formatting is
            // stable under parse/serialize round trips.
            out.push_str(&n.to_string());
        }
        Value::String(s) => {
            let encoded =
                serde_json::to_string(s).map_err(|err| CodecError::Serialize(err.to_string()))?;
            out.push_str(&encoded);
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (idx, (key, val)) in sorted.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                let encoded_key = serde_json::to_string(key)
                    .map_err(|err| CodecError::Serialize(err.to_string()))?;
                out.push_str(&encoded_key);
                out.push(':');
                write_canonical(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// SHA-256 over raw bytes, lowercase hex.
pub fn digest(bytes: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Hash256(hex::encode(hasher.finalize()))
}

/// Digest of a record's canonical form. This is the record's identity.
pub fn digest_value(value: &Value) -> Result<Hash256, CodecError> {
    Ok(digest(&canonicalize(value)?))
}

/// Convert a float into a JSON value, rejecting NaN/Infinity up front.
pub fn float_value(value: f64) -> Result<Value, CodecError> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or(CodecError::NonFiniteNumber)
}
