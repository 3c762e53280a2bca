//! Arbiter Policy - declarative rule engine over feature records.
//!
//! Rule sets are authored in YAML and loaded fail-closed: any field the
//! schema does not know about aborts the load rather than being ignored.
//! Evaluation is total and deterministic over well-formed input; rules
//! apply in file order and the first match wins.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Rule-set loading and validation errors.
#[derive(Debug, Error)]
pub enum RuleSetError {
    #[error("rule set file not found: {0}")]
    NotFound(String),

    #[error("unknown field in rule set: {0}")]
    UnknownField(String),

    #[error("rule '{rule}' uses a non-numeric threshold for op 'lt'")]
    NonNumericThreshold { rule: String },

    #[error("rule set is not valid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Comparison operator for a single condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Lt,
}

/// One predicate over a feature field. A missing field never matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    fn matches(&self, features: &Value) -> bool {
        let Some(actual) = lookup(features, &self.field) else {
            return false;
        };
        match self.op {
            Op::Eq => scalar_eq(actual, &self.value),
            Op::Lt => match (actual.as_f64(), self.value.as_f64()) {
                (Some(actual), Some(threshold)) => actual < threshold,
                _ => false,
            },
        }
    }
}

/// What a matching rule decides.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Action {
    pub decision: String,
    pub reason_code: String,
    #[serde(default)]
    pub override_required: bool,
}

/// A named rule: all conditions must hold for the action to fire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "when")]
    pub conditions: Vec<Condition>,
    pub action: Action,
}

/// Decision to fall back on when no rule matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    pub decision: String,
    #[serde(default)]
    pub override_required: bool,
}

/// A complete versioned policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    pub version: String,
    pub name: String,
    pub rules: Vec<Rule>,
    pub defaults: Defaults,
}

/// The engine's verdict for one feature record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    pub reason_codes: Vec<String>,
    pub override_required: bool,
    pub policy_id: String,
    pub policy_version: String,
}

/// Load and validate a rule set from a YAML file. Fails closed: unknown
/// fields and non-numeric `lt` thresholds abort the load.
pub fn load_rules(path: impl AsRef<Path>) -> Result<RuleSet, RuleSetError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RuleSetError::NotFound(path.display().to_string()));
    }
    let text = fs::read_to_string(path)?;
    parse_rules(&text)
}

/// Parse and validate a rule set from YAML text.
pub fn parse_rules(text: &str) -> Result<RuleSet, RuleSetError> {
    let ruleset: RuleSet = serde_yaml::from_str(text).map_err(|err| {
        let message = err.to_string();
        if message.contains("unknown field") {
            RuleSetError::UnknownField(message)
        } else {
            RuleSetError::Parse(err)
        }
    })?;

    for rule in &ruleset.rules {
        for condition in &rule.conditions {
            if condition.op == Op::Lt && condition.value.as_f64().is_none() {
                return Err(RuleSetError::NonNumericThreshold {
                    rule: rule.id.clone(),
                });
            }
        }
    }
    tracing::debug!(
        name = %ruleset.name,
        version = %ruleset.version,
        rules = ruleset.rules.len(),
        "rule set loaded"
    );
    Ok(ruleset)
}

/// Evaluate a feature record against a rule set. Rules apply in file
/// order; the first rule whose conditions all hold wins; otherwise the
/// defaults apply with a synthetic `DEFAULT_<decision>` reason.
pub fn evaluate(features: &Value, ruleset: &RuleSet) -> Decision {
    for rule in &ruleset.rules {
        if rule.conditions.iter().all(|c| c.matches(features)) {
            return Decision {
                decision: rule.action.decision.clone(),
                reason_codes: vec![rule.action.reason_code.clone()],
                override_required: rule.action.override_required,
                policy_id: rule.id.clone(),
                policy_version: ruleset.version.clone(),
            };
        }
    }
    Decision {
        decision: ruleset.defaults.decision.clone(),
        reason_codes: vec![format!("DEFAULT_{}", ruleset.defaults.decision)],
        override_required: ruleset.defaults.override_required,
        policy_id: "DEFAULT".to_string(),
        policy_version: ruleset.version.clone(),
    }
}

/// Dotted-path lookup into a feature record.
fn lookup<'a>(features: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = features;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Scalar equality: numbers compare numerically, everything else by
/// exact value. Containers never compare equal.
fn scalar_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        },
        (Value::Object(_), _) | (Value::Array(_), _) => false,
        (_, Value::Object(_)) | (_, Value::Array(_)) => false,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RULES: &str = r#"
version: "3"
name: risk-screen
rules:
  - id: POL-STALE
    when:
      - field: quality.staleness_flag
        op: eq
        value: true
    action:
      decision: HOLD
      reason_code: STALE_DATA
      override_required: true
  - id: POL-THIN
    when:
      - field: liquidity_score
        op: lt
        value: 0.25
    action:
      decision: REJECT
      reason_code: THIN_BOOK
defaults:
  decision: PASS
"#;

    fn ruleset() -> RuleSet {
        parse_rules(RULES).unwrap()
    }

    #[test]
    fn first_matching_rule_wins() {
        let features = json!({
            "quality": {"staleness_flag": true},
            "liquidity_score": 0.1
        });
        let decision = evaluate(&features, &ruleset());
        assert_eq!(decision.decision, "HOLD");
        assert_eq!(decision.reason_codes, vec!["STALE_DATA"]);
        assert_eq!(decision.policy_id, "POL-STALE");
        assert_eq!(decision.policy_version, "3");
        assert!(decision.override_required);
    }

    #[test]
    fn lt_compares_numerically() {
        let thin = evaluate(&json!({"liquidity_score": 0.2}), &ruleset());
        assert_eq!(thin.decision, "REJECT");

        let fine = evaluate(&json!({"liquidity_score": 0.25}), &ruleset());
        assert_eq!(fine.decision, "PASS");
    }

    #[test]
    fn missing_fields_fall_through_to_defaults() {
        let decision = evaluate(&json!({}), &ruleset());
        assert_eq!(decision.decision, "PASS");
        assert_eq!(decision.reason_codes, vec!["DEFAULT_PASS"]);
        assert_eq!(decision.policy_id, "DEFAULT");
        assert!(!decision.override_required);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let features = json!({"liquidity_score": 0.01});
        let rules = ruleset();
        let first = evaluate(&features, &rules);
        for _ in 0..5 {
            assert_eq!(evaluate(&features, &rules), first);
        }
    }

    #[test]
    fn rule_order_is_irrelevant_when_one_rule_matches() {
        let mut reversed = ruleset();
        reversed.rules.reverse();
        let features = json!({"liquidity_score": 0.1});
        assert_eq!(
            evaluate(&features, &ruleset()).decision,
            evaluate(&features, &reversed).decision
        );
    }

    #[test]
    fn unknown_fields_fail_the_load() {
        let bad = RULES.replace("reason_code: THIN_BOOK", "reason_code: THIN_BOOK\n      severity: high");
        assert!(matches!(
            parse_rules(&bad),
            Err(RuleSetError::UnknownField(_))
        ));
    }

    #[test]
    fn non_numeric_lt_threshold_fails_the_load() {
        let bad = RULES.replace("value: 0.25", "value: low");
        assert!(matches!(
            parse_rules(&bad),
            Err(RuleSetError::NonNumericThreshold { ref rule }) if rule == "POL-THIN"
        ));
    }

    #[test]
    fn load_from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, RULES).unwrap();

        let loaded = load_rules(&path).unwrap();
        assert_eq!(loaded.name, "risk-screen");
        assert_eq!(loaded.rules.len(), 2);

        assert!(matches!(
            load_rules(dir.path().join("missing.yaml")),
            Err(RuleSetError::NotFound(_))
        ));
    }
}
