//! Arbiter Ledger - tamper-evident append-only hash chain.
//!
//! A ledger file is newline-delimited canonical JSON, one entry per line.
//! Each entry is the caller's record plus two reserved fields: `prev_hash`
//! (the digest of the previous entry, or the genesis sentinel) and `hash`
//! (the digest of the entry's canonical form minus `hash` itself and any
//! signature envelope). Entries are created once at append time, never
//! mutated, never deleted.
//!
//! Single-writer discipline: [`Ledger::open`] holds an exclusive advisory
//! file lock for the ledger's lifetime, so the read-tail / compute / write
//! critical section of `append` cannot race a second writer.

#![deny(unsafe_code)]

mod entry;
mod verify;

pub use entry::{ChainEntry, AUTH_KEY, HASH_KEY, PREV_HASH_KEY};
pub use verify::{verify, VerifyError, VerifyReport};

use arbiter_codec::CodecError;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Genesis sentinel: `prev_hash` of the first entry in every stream.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Ledger-related errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger is locked by another writer: {path}")]
    Locked { path: PathBuf },

    #[error("torn final line at line {line}; apply truncation-repair before opening")]
    TornTail { line: usize },

    #[error("record carries reserved key '{0}'")]
    ReservedKey(String),

    #[error("signing callback failed: {0}")]
    Sign(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// An open, exclusively-locked ledger stream.
pub struct Ledger {
    path: PathBuf,
    file: File,
    last_hash: String,
    entries: u64,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open or create the ledger at `path`, replaying existing entries to
    /// find the chain tail. A torn final line (crash mid-write) fails
    /// closed with [`LedgerError::TornTail`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::open_inner(path.as_ref(), false)
    }

    /// Like [`Ledger::open`], but truncates a torn final line instead of
    /// failing. Safe because `append` fsyncs before returning: a torn tail
    /// means the corresponding decision was never acknowledged.
    pub fn open_with_repair(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::open_inner(path.as_ref(), true)
    }

    fn open_inner(path: &Path, repair: bool) -> Result<Self, LedgerError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .truncate(false)
            .append(true)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(LedgerError::Locked {
                path: path.to_path_buf(),
            });
        }

        let mut text = String::new();
        {
            let mut replay = file.try_clone()?;
            replay.seek(SeekFrom::Start(0))?;
            replay.read_to_string(&mut text)?;
        }

        // Appends are acknowledged only after the newline hits disk, so a
        // final line without one was never acknowledged, even if its JSON
        // happens to be complete. Accepting it would let the next append
        // concatenate onto it and corrupt the chain.
        let unterminated_tail = !text.is_empty() && !text.ends_with('\n');

        let mut last_hash = GENESIS_HASH.to_string();
        let mut entries = 0u64;
        let mut truncate_to: Option<u64> = None;
        {
            let raw_lines: Vec<&str> = text.lines().collect();
            let line_count = raw_lines.len();

            let mut byte_offset = 0u64;
            for (idx, line) in raw_lines.iter().enumerate() {
                let line_len = (line.len() + 1) as u64;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    byte_offset += line_len;
                    continue;
                }
                let is_last = idx == line_count - 1;
                let parsed = if is_last && unterminated_tail {
                    Err("unterminated final line".to_string())
                } else {
                    entry::parse_line(trimmed)
                };
                match parsed {
                    Ok(entry) => {
                        last_hash = entry.hash().to_string();
                        entries += 1;
                    }
                    Err(detail) => {
                        if is_last {
                            if repair {
                                tracing::warn!(
                                    line = idx + 1,
                                    path = %path.display(),
                                    "truncating torn tail line from ledger"
                                );
                                truncate_to = Some(byte_offset);
                            } else {
                                return Err(LedgerError::TornTail { line: idx + 1 });
                            }
                        } else {
                            return Err(
                                verify::map_parse_error((idx + 1) as u64, detail).into()
                            );
                        }
                    }
                }
                byte_offset += line_len;
            }
        }

        if let Some(pos) = truncate_to {
            let truncate_file = OpenOptions::new().write(true).open(path)?;
            truncate_file.set_len(pos)?;
            truncate_file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            last_hash,
            entries,
        })
    }

    /// Append a record to the chain. The entry is linked to the current
    /// tail, written as one canonical line, and fsynced before this
    /// returns. Records must not carry the reserved chain fields.
    pub fn append(&mut self, record: Map<String, Value>) -> Result<ChainEntry, LedgerError> {
        self.append_with(record, |_| Ok(None))
    }

    /// Append a record, letting `sign` attach a signature envelope over the
    /// entry's digest. The envelope is excluded from the content digest, so
    /// the chain stays verifiable without key material. A signing failure
    /// aborts the append before anything is written.
    pub fn append_with(
        &mut self,
        record: Map<String, Value>,
        sign: impl FnOnce(&str) -> Result<Option<Value>, String>,
    ) -> Result<ChainEntry, LedgerError> {
        for reserved in [PREV_HASH_KEY, HASH_KEY, AUTH_KEY] {
            if record.contains_key(reserved) {
                return Err(LedgerError::ReservedKey(reserved.to_string()));
            }
        }

        let mut entry = ChainEntry::link(record, &self.last_hash)?;
        if let Some(auth) = sign(entry.hash()).map_err(LedgerError::Sign)? {
            entry.attach_auth(auth);
        }

        let line = entry.to_canonical_line()?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.file.sync_all()?;

        self.last_hash = entry.hash().to_string();
        self.entries += 1;
        tracing::debug!(
            path = %self.path.display(),
            entries = self.entries,
            hash = entry.hash(),
            "ledger entry appended"
        );
        Ok(entry)
    }

    /// Digest of the current tail entry, or the genesis sentinel.
    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Number of entries replayed plus appended this session.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write as _;

    fn record(label: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("schema".to_string(), json!("gate_decision.v1"));
        map.insert("label".to_string(), json!(label));
        map
    }

    #[test]
    fn first_entry_links_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let mut ledger = Ledger::open(&path).unwrap();

        let entry = ledger.append(record("first")).unwrap();
        assert_eq!(entry.prev_hash(), GENESIS_HASH);
        assert_eq!(ledger.last_hash(), entry.hash());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn appends_link_and_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");

        let first_hash;
        {
            let mut ledger = Ledger::open(&path).unwrap();
            first_hash = ledger.append(record("a")).unwrap().hash().to_string();
            let second = ledger.append(record("b")).unwrap();
            assert_eq!(second.prev_hash(), first_hash);
        }

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        let mut reopened = ledger;
        let third = reopened.append(record("c")).unwrap();
        assert_ne!(third.prev_hash(), first_hash);
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::open(dir.path().join("chain.jsonl")).unwrap();

        let mut bad = record("x");
        bad.insert("hash".to_string(), json!("deadbeef"));
        assert!(matches!(
            ledger.append(bad),
            Err(LedgerError::ReservedKey(key)) if key == "hash"
        ));
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let _first = Ledger::open(&path).unwrap();

        assert!(matches!(
            Ledger::open(&path),
            Err(LedgerError::Locked { .. })
        ));
    }

    #[test]
    fn torn_tail_fails_closed_without_repair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(record("ok")).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"truncated\":").unwrap();
            file.write_all(b"\n").unwrap();
        }

        assert!(matches!(
            Ledger::open(&path),
            Err(LedgerError::TornTail { line: 2 })
        ));

        let repaired = Ledger::open_with_repair(&path).unwrap();
        assert_eq!(repaired.len(), 1);
    }

    #[test]
    fn unterminated_final_line_is_a_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.append(record("a")).unwrap();
            ledger.append(record("b")).unwrap();
        }
        // Crash window between the line write and the newline write: the
        // final line is complete JSON but has no terminator.
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.strip_suffix('\n').unwrap()).unwrap();

        assert!(matches!(
            Ledger::open(&path),
            Err(LedgerError::TornTail { line: 2 })
        ));

        let mut repaired = Ledger::open_with_repair(&path).unwrap();
        assert_eq!(repaired.len(), 1);
        repaired.append(record("c")).unwrap();
        drop(repaired);
        assert_eq!(verify(&path).unwrap().entries, 2);
    }

    #[test]
    fn failing_sign_callback_aborts_the_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        let mut ledger = Ledger::open(&path).unwrap();

        let err = ledger
            .append_with(record("a"), |_| Err("key unavailable".to_string()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Sign(_)));
        assert_eq!(ledger.len(), 0);
        drop(ledger);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn verify_passes_on_untouched_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.jsonl");
        {
            let mut ledger = Ledger::open(&path).unwrap();
            for label in ["a", "b", "c"] {
                ledger.append(record(label)).unwrap();
            }
        }

        let report = verify(&path).unwrap();
        assert_eq!(report.entries, 3);
    }
}
