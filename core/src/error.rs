//! Error taxonomy for the lifecycle engine.
//!
//! Every engine failure is one of a small set of kinds. All of them except
//! [`EngineError::Unavailable`] are deterministic outcomes of the current
//! rows, so retrying them without a change in state yields the same error.

use crate::types::{ApplicationStatus, WalkRequestStatus};
use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the lifecycle engine and record stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or missing input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(Resource),

    /// The rows are not in the state the operation requires.
    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    /// The record store could not be reached or gave up (connection loss,
    /// timeout, serialization failure). Safe to retry the whole operation.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// The record store rejected the operation for a reason outside the
    /// engine's preconditions (undecodable row, unexpected constraint).
    #[error("Record store error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Only infrastructure failures are worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short, stable label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unavailable(_) => "unavailable",
            Self::Storage(_) => "storage",
        }
    }
}

/// The kind of row a [`EngineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A dog
    Dog,
    /// An owner account
    Owner,
    /// A walker account
    Walker,
    /// A walk request
    Request,
    /// An application
    Application,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dog => "dog",
            Self::Owner => "owner",
            Self::Walker => "walker",
            Self::Request => "request",
            Self::Application => "application",
        })
    }
}

/// Why an operation conflicted with the current rows.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The walker already has an application for this request.
    #[error("already applied")]
    AlreadyApplied,

    /// Applications are only taken while the request is open.
    #[error("request not open")]
    RequestNotOpen,

    /// Decisions are only taken while the request is pending.
    #[error("request not pending (status: {0})")]
    RequestNotPending(WalkRequestStatus),

    /// The application was already decided.
    #[error("application not pending (status: {0})")]
    ApplicationNotPending(ApplicationStatus),

    /// The request lifecycle forbids this move.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: WalkRequestStatus,
        /// Requested status
        to: WalkRequestStatus,
    },

    /// Only completed walks can be rated.
    #[error("request not completed (status: {0})")]
    RequestNotCompleted(WalkRequestStatus),

    /// The walk already has a rating.
    #[error("already rated")]
    AlreadyRated,
}

/// Error type for status/role/size parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {domain} value: {value}")]
pub struct ParseStatusError {
    domain: &'static str,
    value: String,
}

impl ParseStatusError {
    pub(crate) fn new(domain: &'static str, value: &str) -> Self {
        Self {
            domain,
            value: value.to_string(),
        }
    }
}

impl From<ParseStatusError> for EngineError {
    fn from(err: ParseStatusError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_messages_match_handler_contract() {
        assert_eq!(
            EngineError::Conflict(ConflictReason::AlreadyApplied).to_string(),
            "Conflict: already applied"
        );
        assert_eq!(
            EngineError::Conflict(ConflictReason::RequestNotOpen).to_string(),
            "Conflict: request not open"
        );
        assert_eq!(EngineError::NotFound(Resource::Request).to_string(), "Not found: request");
    }

    #[test]
    fn invalid_transition_display() {
        let reason = ConflictReason::InvalidTransition {
            from: WalkRequestStatus::Completed,
            to: WalkRequestStatus::Cancelled,
        };
        assert_eq!(reason.to_string(), "invalid transition from completed to cancelled");
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(EngineError::Unavailable("connection reset".to_string()).is_retryable());
        assert!(!EngineError::Conflict(ConflictReason::RequestNotOpen).is_retryable());
        assert!(!EngineError::Storage("bad row".to_string()).is_retryable());
    }

    #[test]
    fn parse_error_becomes_storage_error() {
        let err: EngineError = ParseStatusError::new("application", "maybe").into();
        assert_eq!(err.kind(), "storage");
    }
}
