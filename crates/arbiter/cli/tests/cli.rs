//! End-to-end tests for the `arbiter` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

fn arbiter() -> Command {
    Command::cargo_bin("arbiter").expect("binary builds")
}

fn stale_intent() -> Value {
    json!({
        "schema": "trade_intent.v1",
        "domain_id": "alpha-research",
        "intent_id": "INTENT-20260122A",
        "mode": "DRY_RUN",
        "asset": "BTCUSD",
        "side": "LONG",
        "notes": "signal fired during feed outage",
        "no_execute": true,
        "quality": {"staleness_flag": true, "quality_flags": []}
    })
}

fn append_intent(ledger: &Path, intent: &Value) -> Value {
    let output = arbiter()
        .args(["append", "--path"])
        .arg(ledger)
        .write_stdin(intent.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("stdout is one json line")
}

#[test]
fn stale_intent_is_held_appended_and_verifiable() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("chain.jsonl");

    let receipt = append_intent(&ledger, &stale_intent());
    assert_eq!(receipt["ok"], json!(true));
    assert_eq!(receipt["held"], json!(true));
    assert_eq!(
        receipt["prev_hash"].as_str().unwrap(),
        "0".repeat(64)
    );

    // The persisted entry carries the hold rewrite.
    let line = fs::read_to_string(&ledger).unwrap();
    let entry: Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(entry["side"], json!("FLAT"));
    let holds = entry["hold_reason"].as_array().unwrap();
    assert!(holds.contains(&json!("STALE_DATA_HOLD")));
    assert!(holds.contains(&json!("QUALITY_DEGRADED")));

    arbiter()
        .args(["verify-chain", "--path"])
        .arg(&ledger)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entries\":1"));
}

#[test]
fn tampering_with_an_entry_is_detected_at_its_line() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("chain.jsonl");

    let mut second = stale_intent();
    second["intent_id"] = json!("INTENT-20260122B");
    append_intent(&ledger, &stale_intent());
    append_intent(&ledger, &second);

    let text = fs::read_to_string(&ledger).unwrap();
    let tampered = text.replace("feed outage", "feed healthy");
    assert_ne!(text, tampered);
    fs::write(&ledger, tampered).unwrap();

    arbiter()
        .args(["verify-chain", "--path"])
        .arg(&ledger)
        .assert()
        .failure()
        .stderr(predicate::str::contains("HASH_MISMATCH"));
}

#[test]
fn empty_and_missing_ledgers_fail_with_stable_tokens() {
    let dir = tempfile::tempdir().unwrap();

    let empty = dir.path().join("empty.jsonl");
    fs::write(&empty, "").unwrap();
    arbiter()
        .args(["verify-chain", "--path"])
        .arg(&empty)
        .assert()
        .failure()
        .stderr(predicate::str::contains("EMPTY_LOG"));

    arbiter()
        .args(["verify-chain", "--path"])
        .arg(dir.path().join("missing.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("FILE_NOT_FOUND"));
}

#[test]
fn invalid_intents_are_rejected_without_touching_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("chain.jsonl");

    let mut armed = stale_intent();
    armed["no_execute"] = json!(false);
    arbiter()
        .args(["append", "--path"])
        .arg(&ledger)
        .write_stdin(armed.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("VALIDATION_FAILED"));

    let mut leaky = stale_intent();
    leaky["meta"] = json!({"api_key": "shh"});
    arbiter()
        .args(["append", "--path"])
        .arg(&ledger)
        .write_stdin(leaky.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("VALIDATION_FAILED"));

    assert!(!ledger.exists() || fs::read_to_string(&ledger).unwrap().is_empty());
}

#[test]
fn record_replay_blocks_the_second_use() {
    let dir = tempfile::tempdir().unwrap();
    let fingerprint = "ab".repeat(32);

    arbiter()
        .args(["record-replay", "--root"])
        .arg(dir.path())
        .args(["--path", "seen.jsonl", "--fingerprint", &fingerprint])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ok\":true"));

    arbiter()
        .args(["record-replay", "--root"])
        .arg(dir.path())
        .args(["--path", "seen.jsonl", "--fingerprint", &fingerprint])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"ok\":false"));
}

#[test]
fn policy_eval_applies_first_matching_rule() {
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("rules.yaml");
    fs::write(
        &rules,
        r#"
version: "1"
name: screen
rules:
  - id: POL-STALE
    when:
      - field: staleness_flag
        op: eq
        value: true
    action:
      decision: HOLD
      reason_code: STALE_DATA
defaults:
  decision: PASS
"#,
    )
    .unwrap();

    arbiter()
        .args(["policy-eval", "--rules"])
        .arg(&rules)
        .write_stdin(json!({"staleness_flag": true}).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"policy_id\":\"POL-STALE\""));

    arbiter()
        .args(["policy-eval", "--rules"])
        .arg(&rules)
        .write_stdin(json!({}).to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("DEFAULT_PASS"));

    fs::write(&rules, "version: \"1\"\nname: broken\nbogus: field\n").unwrap();
    arbiter()
        .args(["policy-eval", "--rules"])
        .arg(&rules)
        .write_stdin("{}")
        .assert()
        .failure()
        .stderr(predicate::str::contains("BAD_RULESET"));
}

#[test]
fn signed_appends_verify_and_unsigned_fail_when_required() {
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("chain.jsonl");
    let key = SigningKey::generate(&mut OsRng);

    let priv_path = dir.path().join("signing.key");
    let pub_path = dir.path().join("verify.key");
    fs::write(&priv_path, hex::encode(key.to_bytes())).unwrap();
    fs::write(&pub_path, hex::encode(key.verifying_key().to_bytes())).unwrap();

    arbiter()
        .args(["append", "--sign", "--path"])
        .arg(&ledger)
        .env("SIG_PRIV", &priv_path)
        .env("SIG_KEY_ID", "node-01")
        .write_stdin(stale_intent().to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"signed\":true"));

    arbiter()
        .args(["verify-signatures", "--path"])
        .arg(&ledger)
        .arg("--public-key")
        .arg(&pub_path)
        .env("SIG_REQUIRED", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"verified\":1"));

    // A second, unsigned entry breaks strict verification.
    let mut second = stale_intent();
    second["intent_id"] = json!("INTENT-20260122C");
    append_intent(&ledger, &second);

    arbiter()
        .args(["verify-signatures", "--path"])
        .arg(&ledger)
        .arg("--public-key")
        .arg(&pub_path)
        .env("SIG_REQUIRED", "1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SIG_MISSING"));
}
