//! `policy-eval`: run one feature record through a rule set.

use super::{CommandResult, Failure};
use arbiter_policy::{evaluate, load_rules, RuleSetError};
use serde_json::Value;
use std::io::Read;
use std::path::Path;

pub fn run(rules: &Path) -> CommandResult {
    let ruleset = load_rules(rules)
        .map_err(|err| Failure::new(ruleset_token(&err), err.to_string()))?;

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .map_err(|err| Failure::new("IO_ERROR", err.to_string()))?;
    let features: Value = serde_json::from_str(raw.trim())
        .map_err(|err| Failure::new("BAD_JSON", format!("stdin is not valid json: {err}")))?;

    let decision = evaluate(&features, &ruleset);
    serde_json::to_string(&decision)
        .map_err(|err| Failure::new("IO_ERROR", err.to_string()))
}

fn ruleset_token(err: &RuleSetError) -> &'static str {
    match err {
        RuleSetError::NotFound(_) => "FILE_NOT_FOUND",
        RuleSetError::Io(_) => "IO_ERROR",
        _ => "BAD_RULESET",
    }
}
