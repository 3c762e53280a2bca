//! Arbiter Gate - capability/approval gate with default-deny semantics.
//!
//! The gate answers one question: may this execution envelope proceed?
//! Checks run in a fixed order and the first failure wins; an envelope
//! that passes everything still terminates at the configured backend,
//! which in this crate is always the disabled noop backend.

#![deny(unsafe_code)]

mod replay;

pub use replay::{
    IdempotencyGuard, ReplayKey, ReplayStore, ReplayStoreConfig, ReplayStoreError,
};

use arbiter_types::{ApprovalArtifact, BlockReason, CapabilitySet, ExecutionEnvelope};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Outcome of gate evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block { reason: BlockReason, detail: String },
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Run every gate check against an envelope. First failure wins; the
/// ordering below is part of the contract because reason codes land in
/// audit records.
pub fn evaluate(
    envelope: &ExecutionEnvelope,
    approval: &ApprovalArtifact,
    evidence_ids: &[String],
    capabilities: &CapabilitySet,
    now: DateTime<Utc>,
) -> Verdict {
    if evidence_ids.is_empty() {
        return block(
            BlockReason::NoEvidence,
            "no evidence ids attached to the request",
        );
    }

    if approval.is_expired(now) {
        return Verdict::Block {
            reason: BlockReason::ApprovalExpired,
            detail: format!(
                "approval {} expired at {}",
                approval.approval_id,
                approval.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        };
    }

    if !capabilities.allowed_scopes.contains(&envelope.execution_scope) {
        return Verdict::Block {
            reason: BlockReason::CapabilityMissing,
            detail: format!(
                "execution_scope '{}' is not granted",
                envelope.execution_scope
            ),
        };
    }

    if envelope.allowed_actions.is_empty() {
        return block(BlockReason::NoAction, "envelope declares no actions");
    }
    if envelope.allowed_venues.is_empty() {
        return block(BlockReason::NoVenue, "envelope declares no venues");
    }

    if !envelope
        .allowed_actions
        .iter()
        .any(|action| capabilities.allowed_actions.contains(action))
    {
        return block(
            BlockReason::CapabilityMissing,
            "none of the requested actions are granted",
        );
    }
    if !envelope
        .allowed_venues
        .iter()
        .any(|venue| capabilities.allowed_venues.contains(venue))
    {
        return block(
            BlockReason::CapabilityMissing,
            "none of the requested venues are granted",
        );
    }

    Verdict::Allow
}

fn block(reason: BlockReason, detail: &str) -> Verdict {
    Verdict::Block {
        reason,
        detail: detail.to_string(),
    }
}

/// Terminal outcome of handing an envelope to a backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The backend refused to act. With [`BlockReason::BackendDisabled`]
    /// this is the successful path for a fully valid envelope.
    Blocked { reason: BlockReason, detail: String },
}

/// The seam between gate evaluation and whatever would act on an
/// approved envelope.
pub trait ExecutionBackend {
    fn submit(
        &self,
        envelope: &ExecutionEnvelope,
        approval: &ApprovalArtifact,
        evidence_ids: &[String],
        capabilities: &CapabilitySet,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome;
}

/// Backend that evaluates the full gate and then refuses to execute.
/// Envelope validity is still reported faithfully: a validation failure
/// surfaces its own reason, and only a fully valid envelope reaches the
/// deliberate `BackendDisabled` terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBackend;

impl ExecutionBackend for NoopBackend {
    fn submit(
        &self,
        envelope: &ExecutionEnvelope,
        approval: &ApprovalArtifact,
        evidence_ids: &[String],
        capabilities: &CapabilitySet,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        match evaluate(envelope, approval, evidence_ids, capabilities, now) {
            Verdict::Block { reason, detail } => {
                tracing::info!(reason = reason.code(), %detail, "gate blocked envelope");
                ExecutionOutcome::Blocked { reason, detail }
            }
            Verdict::Allow => ExecutionOutcome::Blocked {
                reason: BlockReason::BackendDisabled,
                detail: "execution backend is disabled".to_string(),
            },
        }
    }
}

/// A gate outcome packaged for the ledger. One record per decision,
/// ready to hand to `Ledger::append`.
#[derive(Clone, Debug)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub approval_id: String,
    pub execution_scope: String,
    pub reason_code: &'static str,
    pub detail: String,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn from_outcome(
        envelope: &ExecutionEnvelope,
        approval: &ApprovalArtifact,
        outcome: &ExecutionOutcome,
        decided_at: DateTime<Utc>,
    ) -> Self {
        let ExecutionOutcome::Blocked { reason, detail } = outcome;
        Self {
            decision_id: Uuid::new_v4().to_string(),
            approval_id: approval.approval_id.clone(),
            execution_scope: envelope.execution_scope.clone(),
            reason_code: reason.code(),
            detail: detail.clone(),
            decided_at,
        }
    }

    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("schema".to_string(), json!("gate_decision.v1"));
        record.insert("decision_id".to_string(), json!(self.decision_id));
        record.insert("approval_id".to_string(), json!(self.approval_id));
        record.insert("execution_scope".to_string(), json!(self.execution_scope));
        record.insert("reason_code".to_string(), json!(self.reason_code));
        record.insert("detail".to_string(), json!(self.detail));
        record.insert(
            "decided_at".to_string(),
            json!(self.decided_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        record
    }
}
