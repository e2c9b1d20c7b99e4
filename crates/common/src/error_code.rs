//! Opaque error codes carried in failure replies.

use serde::{Deserialize, Serialize};

/// An error code as reported by a backend or produced by the orchestrator.
///
/// Backend codes are propagated verbatim; the orchestrator only checks for
/// their presence and never interprets `code` or `description`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode {
    pub code: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorCode {
    /// Operation rejected before any mutation (validation failure).
    pub const OPERATION_FAILURE: &'static str = "SYS.OPERATION_FAILURE";
    /// The targeted aggregate or resource does not exist.
    pub const RESOURCE_NOT_FOUND: &'static str = "SYS.RESOURCE_NOT_FOUND";
    /// The persistence layer failed.
    pub const STORE_ERROR: &'static str = "SYS.STORE_ERROR";
    /// No handler exists for the message.
    pub const UNKNOWN_MESSAGE: &'static str = "SYS.UNKNOWN_MESSAGE";
    pub const INTERNAL_ERROR: &'static str = "SYS.INTERNAL_ERROR";

    /// Creates an error code with a description.
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details: None,
        }
    }

    /// Attaches free-form details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn operation_failure(description: impl Into<String>) -> Self {
        Self::new(Self::OPERATION_FAILURE, description)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "[{}] {}: {}", self.code, self.description, details),
            None => write!(f, "[{}] {}", self.code, self.description),
        }
    }
}
