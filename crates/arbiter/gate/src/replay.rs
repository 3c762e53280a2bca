//! Idempotency and replay protection.
//!
//! Two layers: an in-process guard keyed by approval + envelope, and a
//! persistent fingerprint store for cross-process replay detection. The
//! store is deliberately plain append-only JSONL, not hash-chained; the
//! chain of record for decisions lives in the ledger.

use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Identity of one execution attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayKey {
    pub approval_id: String,
    pub envelope_id: String,
}

/// In-memory first-use guard. All state sits behind one mutex so exactly
/// one concurrent caller of a given key observes first use.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    seen: Mutex<HashMap<ReplayKey, u64>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as used. Returns `(is_first_use, times_seen)` where
    /// `times_seen` includes this call.
    pub fn check_and_mark(&self, key: ReplayKey) -> (bool, u64) {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            // A poisoned map still holds valid counts.
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = seen.entry(key).or_insert(0);
        *count += 1;
        (*count == 1, *count)
    }
}

/// Replay-store failures. Policy violations (bad fingerprint, path
/// escape) are detected before any file is touched.
#[derive(Debug, Error)]
pub enum ReplayStoreError {
    #[error("fingerprint must be 64 hex chars")]
    BadFingerprint,

    #[error("path escapes the allowed root: {0}")]
    ResourceError(PathBuf),

    #[error("replay store is locked by another writer: {0}")]
    Locked(PathBuf),

    #[error("replay store line {line} is not valid json")]
    Corrupt { line: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the store may write. Populated from env/flags at the binary
/// boundary.
#[derive(Clone, Debug)]
pub struct ReplayStoreConfig {
    pub allowed_root: PathBuf,
}

/// Persistent fingerprint store: one JSONL file of
/// `{"fingerprint": ..., "ts": ...}` lines under an allow-listed root.
#[derive(Debug)]
pub struct ReplayStore {
    config: ReplayStoreConfig,
}

#[derive(Serialize, Deserialize)]
struct StoreLine {
    fingerprint: String,
    ts: String,
}

impl ReplayStore {
    pub fn new(config: ReplayStoreConfig) -> Self {
        Self { config }
    }

    /// Record a fingerprint in the store at `path`. Returns
    /// `(true, "recorded")` on first use and `(false, "replay detected")`
    /// without writing when the fingerprint was already present.
    pub fn record(
        &self,
        path: impl AsRef<Path>,
        fingerprint: &str,
    ) -> Result<(bool, &'static str), ReplayStoreError> {
        let fingerprint = normalize_fingerprint(fingerprint)?;
        let path = self.resolve(path.as_ref())?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .truncate(false)
            .append(true)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(ReplayStoreError::Locked(path));
        }

        // Scan-then-append under the lock.
        {
            let mut scan = file.try_clone()?;
            scan.seek(SeekFrom::Start(0))?;
            for (idx, line) in BufReader::new(&mut scan).lines().enumerate() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(trimmed)
                    .map_err(|_| ReplayStoreError::Corrupt { line: idx + 1 })?;
                if value.get("fingerprint").and_then(Value::as_str) == Some(fingerprint.as_str()) {
                    tracing::warn!(%fingerprint, path = %path.display(), "replay detected");
                    return Ok((false, "replay detected"));
                }
            }
        }

        let entry = StoreLine {
            fingerprint,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        file.sync_all()?;
        Ok((true, "recorded"))
    }

    /// Resolve `path` against the allowed root, rejecting any form of
    /// escape before the store file is opened. The prefix check runs on
    /// canonicalized paths, so a symlink planted under the root cannot
    /// redirect writes outside it; the store file itself must not be a
    /// symlink at all.
    fn resolve(&self, path: &Path) -> Result<PathBuf, ReplayStoreError> {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ReplayStoreError::ResourceError(path.to_path_buf()));
        }
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.allowed_root.join(path)
        };

        let root = self
            .config
            .allowed_root
            .canonicalize()
            .map_err(|_| ReplayStoreError::ResourceError(self.config.allowed_root.clone()))?;

        if let Ok(meta) = fs::symlink_metadata(&resolved) {
            if meta.file_type().is_symlink() {
                return Err(ReplayStoreError::ResourceError(resolved));
            }
        }

        let canonical = match resolved.canonicalize() {
            Ok(existing) => existing,
            // The store file may not exist yet; its directory must.
            Err(_) => {
                let parent = resolved
                    .parent()
                    .ok_or_else(|| ReplayStoreError::ResourceError(resolved.clone()))?;
                let name = resolved
                    .file_name()
                    .ok_or_else(|| ReplayStoreError::ResourceError(resolved.clone()))?;
                parent
                    .canonicalize()
                    .map_err(|_| ReplayStoreError::ResourceError(resolved.clone()))?
                    .join(name)
            }
        };

        if !canonical.starts_with(&root) {
            return Err(ReplayStoreError::ResourceError(canonical));
        }
        Ok(canonical)
    }
}

fn normalize_fingerprint(raw: &str) -> Result<String, ReplayStoreError> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.len() != 64 || !lowered.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReplayStoreError::BadFingerprint);
    }
    Ok(lowered)
}
