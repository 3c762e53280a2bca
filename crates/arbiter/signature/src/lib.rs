//! Arbiter Signature - Ed25519 envelopes over ledger entry digests.
//!
//! A signature envelope attests to an entry's content digest, independently
//! of chain linkage: the signed message is the raw 32-byte digest, and the
//! envelope itself is excluded from hashing, so chains verify with or
//! without key material present.
//!
//! Signature verification reads the ledger file directly; it does not
//! recompute or verify hash-chain integrity (that is `arbiter-ledger`'s
//! job).

#![deny(unsafe_code)]

use arbiter_codec::Hash256;
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ALGORITHM: &str = "ed25519";
const DIGEST_KIND: &str = "hash";

/// Signature-related errors.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("key file not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported digest kind: {0}")]
    UnsupportedDigestKind(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("line {line}: signature verification failed")]
    VerificationFailed { line: u64 },

    #[error("line {line}: signature required but missing")]
    MissingSignature { line: u64 },

    #[error("line {line}: {detail}")]
    MalformedEntry { line: u64, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signing configuration. One explicit struct; callers populate it from
/// their environment at the binary boundary.
pub struct SignatureConfig {
    pub enabled: bool,
    pub key_id: String,
    pub signing_key: Option<SigningKey>,
}

impl SignatureConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            key_id: String::new(),
            signing_key: None,
        }
    }

    pub fn enabled(key_id: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            enabled: true,
            key_id: key_id.into(),
            signing_key: Some(signing_key),
        }
    }
}

/// A detached signature over a named digest field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub signature: String,
    pub algorithm: String,
    pub key_id: String,
    pub signed_at: String,
    pub signed_digest_kind: String,
}

impl SignatureEnvelope {
    pub fn to_value(&self) -> serde_json::Value {
        // Serialization of this struct cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Sign an entry digest. Returns `None` when signing is disabled.
pub fn sign_digest(
    config: &SignatureConfig,
    digest: &Hash256,
    signed_at: DateTime<Utc>,
) -> Result<Option<SignatureEnvelope>, SignatureError> {
    if !config.enabled {
        return Ok(None);
    }
    let key = config
        .signing_key
        .as_ref()
        .ok_or_else(|| SignatureError::InvalidKey("signing enabled without a key".to_string()))?;

    let signature = key.sign(&digest.to_bytes());
    Ok(Some(SignatureEnvelope {
        signature: hex::encode(signature.to_bytes()),
        algorithm: ALGORITHM.to_string(),
        key_id: config.key_id.clone(),
        signed_at: signed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        signed_digest_kind: DIGEST_KIND.to_string(),
    }))
}

/// Verify one envelope against the digest it claims to sign. The envelope
/// must declare the algorithm and digest kind this crate produces; an
/// envelope attesting to some other field is rejected, not skipped.
pub fn verify_envelope(
    key: &VerifyingKey,
    envelope: &SignatureEnvelope,
    digest: &Hash256,
) -> Result<(), SignatureError> {
    if envelope.algorithm != ALGORITHM {
        return Err(SignatureError::UnsupportedAlgorithm(envelope.algorithm.clone()));
    }
    if envelope.signed_digest_kind != DIGEST_KIND {
        return Err(SignatureError::UnsupportedDigestKind(
            envelope.signed_digest_kind.clone(),
        ));
    }
    let raw = hex::decode(&envelope.signature)
        .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;
    let signature = Signature::from_slice(&raw)
        .map_err(|err| SignatureError::InvalidSignature(err.to_string()))?;
    key.verify(&digest.to_bytes(), &signature)
        .map_err(|_| SignatureError::VerificationFailed { line: 0 })
}

/// Load a verifying key from a 64-char hex file.
pub fn load_verifying_key(path: impl AsRef<Path>) -> Result<VerifyingKey, SignatureError> {
    let bytes = load_key_bytes(path.as_ref())?;
    VerifyingKey::from_bytes(&bytes).map_err(|err| SignatureError::InvalidKey(err.to_string()))
}

/// Load a signing key from a 64-char hex file.
pub fn load_signing_key(path: impl AsRef<Path>) -> Result<SigningKey, SignatureError> {
    let bytes = load_key_bytes(path.as_ref())?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn load_key_bytes(path: &Path) -> Result<[u8; 32], SignatureError> {
    if !path.exists() {
        return Err(SignatureError::KeyNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    let raw = hex::decode(text.trim())
        .map_err(|err| SignatureError::InvalidKey(err.to_string()))?;
    raw.try_into()
        .map_err(|_| SignatureError::InvalidKey("key must be 32 bytes".to_string()))
}

/// Verify signatures across an entire ledger file. When `required` is true,
/// any unsigned entry is fatal; otherwise unsigned entries are skipped.
/// Returns the number of envelopes verified.
pub fn verify_ledger(
    path: impl AsRef<Path>,
    key: &VerifyingKey,
    required: bool,
) -> Result<u64, SignatureError> {
    let text = fs::read_to_string(path.as_ref())?;
    let mut verified = 0u64;

    for (idx, raw) in text.lines().enumerate() {
        let line = (idx + 1) as u64;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|err| SignatureError::MalformedEntry {
                line,
                detail: format!("invalid json: {err}"),
            })?;

        let digest = value
            .get("hash")
            .and_then(|h| h.as_str())
            .and_then(|h| Hash256::parse(h).ok())
            .ok_or_else(|| SignatureError::MalformedEntry {
                line,
                detail: "missing or malformed 'hash'".to_string(),
            })?;

        let Some(auth) = value.get("auth") else {
            if required {
                return Err(SignatureError::MissingSignature { line });
            }
            continue;
        };

        let envelope: SignatureEnvelope = serde_json::from_value(auth.clone())
            .map_err(|err| SignatureError::MalformedEntry {
                line,
                detail: format!("malformed auth envelope: {err}"),
            })?;

        verify_envelope(key, &envelope, &digest)
            .map_err(|err| at_line(err, line))?;
        verified += 1;
    }

    Ok(verified)
}

fn at_line(err: SignatureError, line: u64) -> SignatureError {
    match err {
        SignatureError::VerificationFailed { .. } => SignatureError::VerificationFailed { line },
        other => other,
    }
}
