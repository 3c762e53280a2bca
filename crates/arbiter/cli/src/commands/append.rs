//! `append`: intent intake. Reads one JSON record from stdin, validates
//! it fail-closed, applies the data-quality hold, and appends the result
//! to the hash chain.

use super::{CommandResult, Failure};
use arbiter_codec::Hash256;
use arbiter_ledger::{Ledger, LedgerError};
use arbiter_signature::{sign_digest, SignatureConfig};
use arbiter_validator::{apply_quality_hold, is_quality_degraded};
use chrono::Utc;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;

pub fn run(path: &Path, sign: bool) -> CommandResult {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(|err| Failure::new("IO_ERROR", err.to_string()))?;

    let intent: Value = serde_json::from_str(raw.trim())
        .map_err(|err| Failure::new("BAD_JSON", format!("stdin is not valid json: {err}")))?;

    let held = is_quality_degraded(&intent);
    let cleared = apply_quality_hold(intent)
        .map_err(|err| Failure::new("VALIDATION_FAILED", err.to_string()))?;

    let Value::Object(record) = cleared else {
        return Err(Failure::new("SCHEMA_MISMATCH", "intent is not an object"));
    };

    let config = signing_config(sign)?;
    let mut ledger = Ledger::open(path).map_err(ledger_failure)?;
    let entry = ledger
        .append_with(record, |digest| {
            let digest = Hash256::parse(digest).map_err(|err| err.to_string())?;
            let envelope = sign_digest(&config, &digest, Utc::now()).map_err(|err| err.to_string())?;
            Ok(envelope.map(|envelope| envelope.to_value()))
        })
        .map_err(ledger_failure)?;

    Ok(json!({
        "ok": true,
        "hash": entry.hash(),
        "prev_hash": entry.prev_hash(),
        "held": held,
        "signed": entry.auth().is_some(),
    })
    .to_string())
}

fn signing_config(sign: bool) -> Result<SignatureConfig, Failure> {
    let enabled = sign || std::env::var("SIG_ENABLED").is_ok_and(|v| v == "1");
    if !enabled {
        return Ok(SignatureConfig::disabled());
    }

    let key_path = std::env::var("SIG_PRIV")
        .map_err(|_| Failure::new("KEY_ERROR", "SIG_PRIV is not set"))?;
    let key_id = std::env::var("SIG_KEY_ID").unwrap_or_else(|_| "default".to_string());
    let signing_key = arbiter_signature::load_signing_key(&key_path)
        .map_err(|err| Failure::new("KEY_ERROR", err.to_string()))?;
    Ok(SignatureConfig::enabled(key_id, signing_key))
}

fn ledger_failure(err: LedgerError) -> Failure {
    let token = match &err {
        LedgerError::Locked { .. } => "LEDGER_LOCKED",
        LedgerError::TornTail { .. } => "TORN_TAIL",
        LedgerError::ReservedKey(_) => "SCHEMA_MISMATCH",
        LedgerError::Sign(_) => "SIGN_FAILED",
        LedgerError::Codec(_) => "BAD_JSON",
        LedgerError::Verify(verify) => verify.token(),
        LedgerError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => "FILE_NOT_FOUND",
        LedgerError::Io(_) => "IO_ERROR",
    };
    Failure::new(token, err.to_string())
}
