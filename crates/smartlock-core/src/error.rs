//! # Error Types
//!
//! Domain-specific error types for smartlock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  smartlock-core errors (this file)                                     │
//! │  ├── CoreError   - Malformed input (tag ids, snapshots, commands)      │
//! │  └── Rejection   - Operator intent refused by a guard                  │
//! │                                                                         │
//! │  smartlock-sync errors (separate crate)                                │
//! │  └── SyncError   - Config, transport and agent failures                │
//! │                                                                         │
//! │  Flow: CoreError ──► logged & dropped (never corrupts the tag set)     │
//! │        Rejection ──► SyncError::Rejected ──► shown to the operator     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither type is fatal: after any of them the session stays usable and
//! the next operation may be attempted immediately.

use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use crate::types::TagId;

// =============================================================================
// Core Error
// =============================================================================

/// Malformed input reaching the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A tag identifier failed validation.
    #[error("Invalid tag id '{value}': {reason}")]
    InvalidTagId { value: String, reason: String },

    /// A payload on the tags channel could not be decoded.
    ///
    /// ## When This Occurs
    /// - Payload is not JSON
    /// - `tags` is not an array of strings
    /// - One of the listed ids is not a valid [`TagId`]
    #[error("Malformed tag snapshot: {0}")]
    MalformedSnapshot(String),

    /// A command payload is not part of the device vocabulary.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedSnapshot(err.to_string())
    }
}

// =============================================================================
// Rejection
// =============================================================================

/// An operator intent that was refused without any side effect.
///
/// Rejections are user-facing: the message is what the operator sees.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// The broker link is down; nothing was published.
    #[error("MQTT not connected")]
    NotConnected,

    /// An add is already waiting for the device.
    #[error("An add is already in progress")]
    AddInProgress,

    /// A delete is already waiting for the device.
    #[error("Tag {tag} is still being deleted")]
    DeleteInProgress { tag: TagId },

    /// The operator did not confirm the deletion.
    #[error("Deletion of tag {tag} was not confirmed")]
    DeleteDeclined { tag: TagId },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidTagId {
            value: "".to_string(),
            reason: "must not be empty".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid tag id '': must not be empty");
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(Rejection::NotConnected.to_string(), "MQTT not connected");

        let tag = TagId::parse("04A1B2C3").unwrap();
        let err = Rejection::DeleteInProgress { tag };
        assert_eq!(err.to_string(), "Tag 04A1B2C3 is still being deleted");
    }

    #[test]
    fn test_json_error_converts_to_malformed_snapshot() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(matches!(core_err, CoreError::MalformedSnapshot(_)));
    }

    #[test]
    fn test_rejection_serializes_with_kind() {
        let json = serde_json::to_string(&Rejection::AddInProgress).unwrap();
        assert_eq!(json, r#"{"kind":"add_in_progress"}"#);
    }
}
