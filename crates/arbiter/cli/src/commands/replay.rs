//! `record-replay`: persistent replay-guard front end.

use super::{CommandResult, Failure};
use arbiter_gate::{ReplayStore, ReplayStoreConfig, ReplayStoreError};
use serde_json::json;
use std::path::Path;

pub fn run(root: &Path, path: &Path, fingerprint: &str) -> CommandResult {
    let store = ReplayStore::new(ReplayStoreConfig {
        allowed_root: root.to_path_buf(),
    });

    let (first_use, status) = store
        .record(path, fingerprint)
        .map_err(|err| Failure::new(replay_token(&err), err.to_string()))?;

    if first_use {
        Ok(json!({"ok": true, "status": status}).to_string())
    } else {
        // Replays exit non-zero so wrapping scripts stop.
        Err(Failure::new("REPLAY_DETECTED", status)
            .with_payload(json!({"ok": false, "status": status})))
    }
}

fn replay_token(err: &ReplayStoreError) -> &'static str {
    match err {
        ReplayStoreError::BadFingerprint => "BAD_FINGERPRINT",
        ReplayStoreError::ResourceError(_) => "RESOURCE_ERROR",
        ReplayStoreError::Locked(_) => "STORE_LOCKED",
        ReplayStoreError::Corrupt { .. } => "BAD_JSON",
        ReplayStoreError::Io(_) => "IO_ERROR",
    }
}
