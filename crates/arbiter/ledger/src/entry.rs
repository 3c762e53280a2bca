//! Chain entry construction and parsing.

use arbiter_codec::{canonicalize, digest, CodecError, Hash256};
use serde_json::{Map, Value};

/// Reserved field: digest of the previous entry (or the genesis sentinel).
pub const PREV_HASH_KEY: &str = "prev_hash";
/// Reserved field: digest of this entry's canonical form minus `hash` and
/// `auth`.
pub const HASH_KEY: &str = "hash";
/// Reserved field: optional signature envelope, excluded from hashing so the
/// chain verifies without key material.
pub const AUTH_KEY: &str = "auth";

/// One immutable line of a ledger stream: the caller's record plus the
/// reserved chain fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainEntry {
    fields: Map<String, Value>,
}

impl ChainEntry {
    /// Build an entry by linking `record` to the tail digest `prev_hash`.
    /// Invariant: `hash = digest(canonicalize(entry minus hash/auth))`.
    pub(crate) fn link(
        mut record: Map<String, Value>,
        prev_hash: &str,
    ) -> Result<Self, CodecError> {
        record.insert(PREV_HASH_KEY.to_string(), Value::String(prev_hash.to_string()));
        let hash = hash_fields(&record)?;
        record.insert(HASH_KEY.to_string(), Value::String(hash.to_string()));
        Ok(Self { fields: record })
    }

    pub(crate) fn attach_auth(&mut self, auth: Value) {
        self.fields.insert(AUTH_KEY.to_string(), auth);
    }

    pub fn prev_hash(&self) -> &str {
        match self.fields.get(PREV_HASH_KEY) {
            Some(Value::String(s)) => s,
            _ => "",
        }
    }

    pub fn hash(&self) -> &str {
        match self.fields.get(HASH_KEY) {
            Some(Value::String(s)) => s,
            _ => "",
        }
    }

    /// Signature envelope, when one was attached at append time.
    pub fn auth(&self) -> Option<&Value> {
        self.fields.get(AUTH_KEY)
    }

    /// All fields, reserved ones included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_canonical_line(&self) -> Result<String, CodecError> {
        let bytes = canonicalize(&Value::Object(self.fields.clone()))?;
        String::from_utf8(bytes).map_err(|err| CodecError::Serialize(err.to_string()))
    }
}

/// Digest of an entry's fields minus `hash` and `auth`.
pub(crate) fn hash_fields(fields: &Map<String, Value>) -> Result<Hash256, CodecError> {
    let mut core = fields.clone();
    core.remove(HASH_KEY);
    core.remove(AUTH_KEY);
    let bytes = canonicalize(&Value::Object(core))?;
    Ok(digest(&bytes))
}

/// Parse one ledger line into an entry, checking only local shape: it must
/// be a JSON object with string `prev_hash` and 64-hex `hash` fields.
/// Chain linkage and content-hash checks belong to `verify`.
pub(crate) fn parse_line(line: &str) -> Result<ChainEntry, String> {
    let value: Value =
        serde_json::from_str(line).map_err(|err| format!("invalid json: {err}"))?;
    let Value::Object(fields) = value else {
        return Err("line is not a JSON object".to_string());
    };

    match fields.get(PREV_HASH_KEY) {
        Some(Value::String(_)) => {}
        _ => return Err(format!("missing or non-string '{PREV_HASH_KEY}'")),
    }
    match fields.get(HASH_KEY) {
        Some(Value::String(hash)) => {
            if Hash256::parse(hash).is_err() {
                return Err(format!("'{HASH_KEY}' is not a 64-char lowercase hex digest"));
            }
        }
        _ => return Err(format!("missing or non-string '{HASH_KEY}'")),
    }

    Ok(ChainEntry { fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GENESIS_HASH;
    use serde_json::json;

    #[test]
    fn hash_excludes_hash_and_auth_fields() {
        let mut record = Map::new();
        record.insert("k".to_string(), json!("v"));
        let mut entry = ChainEntry::link(record, GENESIS_HASH).unwrap();
        let before = entry.hash().to_string();

        entry.attach_auth(json!({"algorithm": "ed25519", "signature": "ab"}));
        let recomputed = hash_fields(entry.fields()).unwrap();
        assert_eq!(recomputed.as_str(), before);
    }

    #[test]
    fn parse_line_round_trips() {
        let mut record = Map::new();
        record.insert("k".to_string(), json!([1, 2, 3]));
        let entry = ChainEntry::link(record, GENESIS_HASH).unwrap();
        let line = entry.to_canonical_line().unwrap();

        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn parse_line_rejects_missing_chain_fields() {
        assert!(parse_line("{\"k\":1}").is_err());
        assert!(parse_line("[1,2]").is_err());
        assert!(parse_line("{\"prev_hash\":\"x\",\"hash\":\"nothex\"}").is_err());
    }
}
