//! Arbiter Types - shared data model for the decision gate and ledger.
//!
//! Plain data structures exchanged between the validator, the capability
//! gate, and the ledger. Nothing here performs I/O; deadlines are data-level
//! and are always checked against a caller-supplied "now".

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Directional stance of an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
            Side::Flat => "FLAT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LONG" => Some(Side::Long),
            "SHORT" => Some(Side::Short),
            "FLAT" => Some(Side::Flat),
            _ => None,
        }
    }
}

/// Per-intent data-quality snapshot. Ephemeral: computed upstream and
/// embedded in the intent, never persisted on its own.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    #[serde(default)]
    pub staleness_flag: bool,
    #[serde(default)]
    pub quality_flags: BTreeSet<String>,
}

/// A caller's request to have an action performed. Consumed once by the
/// capability gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    pub execution_scope: String,
    pub allowed_actions: Vec<String>,
    pub allowed_venues: Vec<String>,
    pub max_size: String,
    pub time_limit: DateTime<Utc>,
    pub idempotency_key: String,
    #[serde(default)]
    pub risk_flags: Vec<String>,
}

/// Out-of-band approval artifact. Read-only to the gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalArtifact {
    pub approval_id: String,
    pub decision: String,
    pub approver_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub policy_refs: Vec<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ApprovalArtifact {
    /// An approval whose deadline has passed is expired. The boundary is
    /// inclusive: `expires_at == now` counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Capabilities granted to a caller, checked against an envelope's declared
/// requirements.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub allowed_scopes: BTreeSet<String>,
    #[serde(default)]
    pub allowed_actions: BTreeSet<String>,
    #[serde(default)]
    pub allowed_venues: BTreeSet<String>,
}

/// Why the gate blocked a request. Every variant carries a stable reason
/// code for audit records; the human-readable detail travels separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    NoEvidence,
    ApprovalExpired,
    CapabilityMissing,
    NoAction,
    NoVenue,
    /// The envelope validated but the execution backend is deliberately
    /// disabled. A successful outcome, not a validation failure.
    BackendDisabled,
}

impl BlockReason {
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::NoEvidence => "NO_EVIDENCE",
            BlockReason::ApprovalExpired => "APPROVAL_EXPIRED",
            BlockReason::CapabilityMissing => "CAPABILITY_MISSING",
            BlockReason::NoAction => "NO_ACTION",
            BlockReason::NoVenue => "NO_VENUE",
            BlockReason::BackendDisabled => "BACKEND_DISABLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn side_round_trips_through_wire_form() {
        for side in [Side::Long, Side::Short, Side::Flat] {
            assert_eq!(Side::parse(side.as_str()), Some(side));
        }
        assert_eq!(Side::parse("long"), None);
    }

    #[test]
    fn approval_expiry_boundary_is_inclusive() {
        let expires = Utc.with_ymd_and_hms(2026, 1, 22, 0, 0, 0).unwrap();
        let approval = ApprovalArtifact {
            approval_id: "appr-1".to_string(),
            decision: "APPROVE".to_string(),
            approver_id: "human-1".to_string(),
            expires_at: expires,
            policy_refs: vec!["POL-1".to_string()],
            capabilities: BTreeSet::new(),
        };

        assert!(!approval.is_expired(expires - chrono::Duration::seconds(1)));
        assert!(approval.is_expired(expires));
        assert!(approval.is_expired(expires + chrono::Duration::seconds(1)));
    }

    #[test]
    fn block_reason_codes_are_stable() {
        assert_eq!(BlockReason::NoEvidence.code(), "NO_EVIDENCE");
        assert_eq!(BlockReason::ApprovalExpired.code(), "APPROVAL_EXPIRED");
        assert_eq!(BlockReason::BackendDisabled.code(), "BACKEND_DISABLED");
    }
}
