//! Arbiter Validator - fail-closed validation of trade intents.
//!
//! Two pure stages over a JSON record:
//!
//! 1. Structural validation: required keys, type and enum checks, and a
//!    recursive forbidden-key scan. Structural violations are caller bugs
//!    and hard-fail.
//! 2. Quality hold: degraded input quality is an expected operating
//!    condition, not an error. A structurally-valid but degraded intent is
//!    rewritten to the safest action (side FLAT, no-execute) instead of
//!    erroring, so the pipeline keeps flowing with a no-op decision.

#![deny(unsafe_code)]

mod scan;

pub use scan::{forbidden_keys, scan_forbidden_keys};

use arbiter_types::{QualitySnapshot, Side};
use serde_json::{json, Value};
use thiserror::Error;

/// Schema identifier every intent must carry.
pub const INTENT_SCHEMA: &str = "trade_intent.v1";

/// Reason token appended when a hold is forced by stale data.
pub const STALE_DATA_HOLD: &str = "STALE_DATA_HOLD";
/// Reason token appended alongside every quality-driven hold.
pub const QUALITY_DEGRADED: &str = "QUALITY_DEGRADED";

/// Quality flags that force a conservative hold (matched case-insensitively).
pub const HOLD_QUALITY_FLAGS: [&str; 5] =
    ["stale", "rate_limited", "exchange_error", "gap", "missing_candle"];

const REQUIRED_KEYS: [&str; 7] =
    ["schema", "domain_id", "intent_id", "mode", "asset", "side", "notes"];

/// Validation failures. All variants are hard failures of the current
/// operation; none are retried automatically.
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("intent is not a JSON object")]
    NotAnObject,

    #[error("missing required key: {0}")]
    MissingKey(String),

    #[error("key '{key}' must be {expected}")]
    BadType { key: String, expected: &'static str },

    #[error("key '{key}' has unsupported value: {got}")]
    BadEnum { key: String, got: String },

    #[error("key '{key}' fails pattern check: {got}")]
    BadPattern { key: String, got: String },

    #[error("forbidden keys present: {paths:?}")]
    ForbiddenKeyPresent { paths: Vec<String> },

    #[error("no_execute must be exactly true")]
    ExecutionNotAllowed,
}

/// Structural validation. Pure; touches no I/O.
pub fn validate_intent(intent: &Value) -> Result<(), ValidatorError> {
    let Value::Object(fields) = intent else {
        return Err(ValidatorError::NotAnObject);
    };

    for key in REQUIRED_KEYS {
        if !fields.contains_key(key) {
            return Err(ValidatorError::MissingKey(key.to_string()));
        }
    }

    expect_str(intent, "schema", |s| s == INTENT_SCHEMA)?;
    expect_str(intent, "domain_id", |s| !s.trim().is_empty())?;
    expect_str(intent, "mode", |s| s == "DRY_RUN")?;
    expect_str(intent, "notes", |s| !s.trim().is_empty())?;

    let intent_id = str_field(intent, "intent_id")?;
    if !is_valid_intent_id(intent_id) {
        return Err(ValidatorError::BadPattern {
            key: "intent_id".to_string(),
            got: intent_id.to_string(),
        });
    }

    let asset = str_field(intent, "asset")?;
    if !is_valid_asset(asset) {
        return Err(ValidatorError::BadPattern {
            key: "asset".to_string(),
            got: asset.to_string(),
        });
    }

    let side = str_field(intent, "side")?;
    if Side::parse(side).is_none() {
        return Err(ValidatorError::BadEnum {
            key: "side".to_string(),
            got: side.to_string(),
        });
    }

    if let Some(quality) = fields.get("quality") {
        if !quality.is_object() {
            return Err(ValidatorError::BadType {
                key: "quality".to_string(),
                expected: "an object",
            });
        }
    }

    let paths = scan_forbidden_keys(intent);
    if !paths.is_empty() {
        return Err(ValidatorError::ForbiddenKeyPresent { paths });
    }

    if fields.get("no_execute") != Some(&Value::Bool(true)) {
        return Err(ValidatorError::ExecutionNotAllowed);
    }

    Ok(())
}

/// Whether the embedded quality snapshot forces a conservative hold.
/// Quality data that cannot even be read counts as degraded.
pub fn is_quality_degraded(intent: &Value) -> bool {
    let Some(raw) = intent.get("quality") else {
        return false;
    };
    let Ok(quality) = serde_json::from_value::<QualitySnapshot>(raw.clone()) else {
        return true;
    };
    quality.staleness_flag
        || quality.quality_flags.iter().any(|flag| {
            let lowered = flag.to_ascii_lowercase();
            HOLD_QUALITY_FLAGS.contains(&lowered.as_str())
        })
}

/// Structurally validate, then apply the quality-hold rewrite when the
/// input is degraded: side is forced to FLAT, no-execute stays true, and
/// the fixed hold tokens are appended idempotently to both the top-level
/// `hold_reason` list and the embedded quality flags. The rewritten record
/// is re-scanned before being returned.
pub fn apply_quality_hold(intent: Value) -> Result<Value, ValidatorError> {
    validate_intent(&intent)?;

    if !is_quality_degraded(&intent) {
        return Ok(intent);
    }

    let Value::Object(mut fields) = intent else {
        return Err(ValidatorError::NotAnObject);
    };

    tracing::info!(
        intent_id = fields.get("intent_id").and_then(|v| v.as_str()).unwrap_or(""),
        "degraded input quality, forcing conservative hold"
    );

    fields.insert("side".to_string(), json!(Side::Flat.as_str()));
    fields.insert("no_execute".to_string(), Value::Bool(true));

    let mut hold_reason = take_string_list(fields.remove("hold_reason"));
    push_unique(&mut hold_reason, STALE_DATA_HOLD);
    push_unique(&mut hold_reason, QUALITY_DEGRADED);
    fields.insert("hold_reason".to_string(), json!(hold_reason));

    let mut quality = match fields.remove("quality") {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    let mut flags = take_string_list(quality.remove("quality_flags"));
    push_unique(&mut flags, STALE_DATA_HOLD);
    push_unique(&mut flags, QUALITY_DEGRADED);
    quality.insert("quality_flags".to_string(), json!(flags));
    fields.insert("quality".to_string(), Value::Object(quality));

    let rewritten = Value::Object(fields);
    let paths = scan_forbidden_keys(&rewritten);
    if !paths.is_empty() {
        return Err(ValidatorError::ForbiddenKeyPresent { paths });
    }
    Ok(rewritten)
}

fn take_string_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn push_unique(list: &mut Vec<String>, token: &str) {
    if !list.iter().any(|existing| existing == token) {
        list.push(token.to_string());
    }
}

fn str_field<'a>(intent: &'a Value, key: &str) -> Result<&'a str, ValidatorError> {
    intent
        .get(key)
        .and_then(Value::as_str)
        .ok_or(ValidatorError::BadType {
            key: key.to_string(),
            expected: "a string",
        })
}

fn expect_str(
    intent: &Value,
    key: &str,
    check: impl Fn(&str) -> bool,
) -> Result<(), ValidatorError> {
    let value = str_field(intent, key)?;
    if !check(value) {
        return Err(ValidatorError::BadEnum {
            key: key.to_string(),
            got: value.to_string(),
        });
    }
    Ok(())
}

fn is_valid_intent_id(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("INTENT-") else {
        return false;
    };
    rest.len() >= 8
        && rest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_valid_asset(value: &str) -> bool {
    (3..=12).contains(&value.len())
        && value.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
