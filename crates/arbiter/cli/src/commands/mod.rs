//! Subcommand implementations. Each command returns a ready-to-print
//! JSON line or a [`Failure`] carrying a stable error token.

pub mod append;
pub mod policy;
pub mod replay;
pub mod verify;

use serde_json::{json, Value};

/// A command failure destined for stderr. Most failures render as
/// `{"error": TOKEN, "detail": ...}`; a command may substitute its own
/// payload when its contract fixes the output shape.
pub struct Failure {
    pub token: &'static str,
    pub detail: String,
    pub payload: Option<Value>,
    pub exit_code: u8,
}

impl Failure {
    pub fn new(token: &'static str, detail: impl Into<String>) -> Self {
        Self {
            token,
            detail: detail.into(),
            payload: None,
            exit_code: 1,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn to_json(&self) -> String {
        match &self.payload {
            Some(payload) => payload.to_string(),
            None => json!({"error": self.token, "detail": self.detail}).to_string(),
        }
    }
}

pub type CommandResult = Result<String, Failure>;
