//! Full-chain verification.
//!
//! Verification is a pure read: every line is re-parsed, its linkage to the
//! previous entry re-checked, and its content hash recomputed. The first
//! mismatch fails closed with the offending 1-based line number; nothing is
//! ever auto-repaired here.

use crate::entry;
use crate::GENESIS_HASH;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// First verification failure, by line and kind.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("line {line}: chain break (expected prev {expected}, got {got})")]
    ChainBreak {
        line: u64,
        expected: String,
        got: String,
    },

    #[error("line {line}: hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch {
        line: u64,
        stored: String,
        computed: String,
    },

    #[error("line {line}: bad json: {detail}")]
    BadJson { line: u64, detail: String },

    #[error("line {line}: schema violation: {detail}")]
    SchemaViolation { line: u64, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    /// Stable machine-readable token for CI and ops tooling.
    pub fn token(&self) -> &'static str {
        match self {
            VerifyError::ChainBreak { .. } => "CHAIN_BREAK",
            VerifyError::HashMismatch { .. } => "HASH_MISMATCH",
            VerifyError::BadJson { .. } => "BAD_JSON",
            VerifyError::SchemaViolation { .. } => "SCHEMA_MISMATCH",
            VerifyError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                "FILE_NOT_FOUND"
            }
            VerifyError::Io(_) => "IO_ERROR",
        }
    }
}

/// Outcome of a successful verification pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyReport {
    /// Entries processed. Zero for an empty ledger, which verifies
    /// trivially.
    pub entries: u64,
    /// Digest of the final entry, when any exist.
    pub head_hash: Option<String>,
}

/// Verify an entire ledger stream. A truncated final line is a hard
/// failure (`BadJson` at that line), not a skip: callers wanting crash
/// tolerance must repair before verifying.
pub fn verify(path: impl AsRef<Path>) -> Result<VerifyReport, VerifyError> {
    let text = fs::read_to_string(path.as_ref())?;

    let mut prev = GENESIS_HASH.to_string();
    let mut entries = 0u64;
    let mut head_hash = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = (idx + 1) as u64;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let entry = entry::parse_line(line).map_err(|detail| map_parse_error(line_no, detail))?;

        if entry.prev_hash() != prev {
            return Err(VerifyError::ChainBreak {
                line: line_no,
                expected: prev,
                got: entry.prev_hash().to_string(),
            });
        }

        let computed = entry::hash_fields(entry.fields()).map_err(|err| {
            VerifyError::SchemaViolation {
                line: line_no,
                detail: err.to_string(),
            }
        })?;
        if computed.as_str() != entry.hash() {
            return Err(VerifyError::HashMismatch {
                line: line_no,
                stored: entry.hash().to_string(),
                computed: computed.to_string(),
            });
        }

        prev = entry.hash().to_string();
        head_hash = Some(prev.clone());
        entries += 1;
    }

    Ok(VerifyReport { entries, head_hash })
}

pub(crate) fn map_parse_error(line: u64, detail: String) -> VerifyError {
    // Shape problems on an otherwise well-formed JSON object are schema
    // violations; everything else is bad JSON.
    if detail.starts_with("invalid json") {
        VerifyError::BadJson { line, detail }
    } else {
        VerifyError::SchemaViolation { line, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;
    use serde_json::json;
    use std::fs;

    fn build_chain(path: &Path, labels: &[&str]) {
        let mut ledger = Ledger::open(path).unwrap();
        for label in labels {
            let mut record = serde_json::Map::new();
            record.insert("schema".to_string(), json!("gate_decision.v1"));
            record.insert("label".to_string(), json!(label));
            ledger.append(record).unwrap();
        }
    }

    #[test]
    fn empty_ledger_verifies_trivially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        fs::write(&path, "").unwrap();

        let report = verify(&path).unwrap();
        assert_eq!(report.entries, 0);
        assert_eq!(report.head_hash, None);
    }

    #[test]
    fn missing_file_maps_to_file_not_found_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify(dir.path().join("absent.jsonl")).unwrap_err();
        assert_eq!(err.token(), "FILE_NOT_FOUND");
    }

    #[test]
    fn single_byte_tamper_fails_at_that_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        build_chain(&path, &["a", "b", "c"]);

        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        // Flip one content byte in the middle entry.
        lines[1] = lines[1].replace("\"label\":\"b\"", "\"label\":\"x\"");
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let err = verify(&path).unwrap_err();
        assert!(matches!(err, VerifyError::HashMismatch { line: 2, .. }));
        assert_eq!(err.token(), "HASH_MISMATCH");
    }

    #[test]
    fn relinked_entry_reports_chain_break() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        build_chain(&path, &["a", "b"]);

        let text = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        // Drop the first entry: the second now links to a missing tail.
        lines.remove(0);
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        let err = verify(&path).unwrap_err();
        assert!(matches!(err, VerifyError::ChainBreak { line: 1, .. }));
        assert_eq!(err.token(), "CHAIN_BREAK");
    }

    #[test]
    fn truncated_final_line_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        build_chain(&path, &["a"]);

        let mut text = fs::read_to_string(&path).unwrap();
        text.truncate(text.len() / 2);
        fs::write(&path, text).unwrap();

        let err = verify(&path).unwrap_err();
        assert_eq!(err.token(), "BAD_JSON");
    }

    #[test]
    fn non_object_line_is_schema_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        fs::write(&path, "[1,2,3]\n").unwrap();

        let err = verify(&path).unwrap_err();
        assert_eq!(err.token(), "SCHEMA_MISMATCH");
    }
}
