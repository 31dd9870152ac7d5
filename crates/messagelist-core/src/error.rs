use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::MsgId;

/// Broad error category used for logging and fallback decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The RPC round-trip to the core failed; retrying later may succeed.
    Transport,
    /// The requested message, chat or draft does not exist.
    NotFound,
    /// Arguments were rejected by the core.
    InvalidInput,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload returned across the RPC boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct CoreError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl CoreError {
    /// Construct a new core error.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transient RPC failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transport, "rpc_unavailable", message)
    }

    /// Standard "message does not exist" error.
    pub fn message_not_found(msg_id: MsgId) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            "message_not_found",
            format!("message {msg_id} does not exist"),
        )
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        self.category == ErrorCategory::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_not_found_error_code_stable() {
        let err = CoreError::message_not_found(MsgId(42));
        assert_eq!(err.code, "message_not_found");
        assert_eq!(err.category, ErrorCategory::NotFound);
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_errors_are_transient() {
        let err = CoreError::transport("socket closed");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Transport:rpc_unavailable: socket closed");
    }
}
