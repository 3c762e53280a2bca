//! Chain and signature verification commands.

use super::{CommandResult, Failure};
use arbiter_signature::SignatureError;
use serde_json::json;
use std::path::Path;

/// `verify-chain`: replay the hash chain and report the head.
pub fn chain(path: &Path) -> CommandResult {
    let report = arbiter_ledger::verify(path)
        .map_err(|err| Failure::new(err.token(), err.to_string()))?;

    if report.entries == 0 {
        return Err(Failure::new("EMPTY_LOG", "ledger contains no entries"));
    }

    Ok(json!({
        "ok": true,
        "entries": report.entries,
        "head_hash": report.head_hash,
    })
    .to_string())
}

/// `verify-signatures`: check every signed entry against the given key.
pub fn signatures(path: &Path, public_key: &Path, required: bool) -> CommandResult {
    let key = arbiter_signature::load_verifying_key(public_key)
        .map_err(|err| Failure::new("KEY_ERROR", err.to_string()))?;

    let verified = arbiter_signature::verify_ledger(path, &key, required)
        .map_err(|err| Failure::new(signature_token(&err), err.to_string()))?;

    Ok(json!({"ok": true, "verified": verified, "required": required}).to_string())
}

fn signature_token(err: &SignatureError) -> &'static str {
    match err {
        SignatureError::MissingSignature { .. } => "SIG_MISSING",
        SignatureError::VerificationFailed { .. }
        | SignatureError::InvalidSignature(_)
        | SignatureError::UnsupportedAlgorithm(_)
        | SignatureError::UnsupportedDigestKind(_) => "SIG_INVALID",
        SignatureError::KeyNotFound(_) | SignatureError::InvalidKey(_) => "KEY_ERROR",
        SignatureError::MalformedEntry { .. } => "BAD_JSON",
        SignatureError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => "FILE_NOT_FOUND",
        SignatureError::Io(_) => "IO_ERROR",
    }
}
