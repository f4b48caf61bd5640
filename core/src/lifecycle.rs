//! Pure transition rules for walk requests and applications.
//!
//! These functions decide, from rows already loaded inside a transaction,
//! whether an operation may proceed. They perform no I/O, so the engine can
//! evaluate them after taking its row lock and the outcome holds until commit.

use crate::error::{ConflictReason, EngineError, Result};
use crate::types::{Application, ApplicationStatus, WalkRequest, WalkRequestStatus};

/// Outcome of a guard that allows the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Perform the transition.
    Apply,
    /// The transition already happened; the call is a retry of a committed one.
    Repeat,
}

/// A walker may only apply while the request is open.
///
/// # Errors
///
/// Returns [`ConflictReason::RequestNotOpen`] for any other status.
pub fn ensure_open(request: &WalkRequest) -> Result<()> {
    if request.status == WalkRequestStatus::Open {
        Ok(())
    } else {
        Err(EngineError::Conflict(ConflictReason::RequestNotOpen))
    }
}

/// Decide whether `application` may be accepted for `request`.
///
/// Accepting an application that is already the accepted one of an accepted
/// request is a [`Decision::Repeat`].
///
/// # Errors
///
/// - [`ConflictReason::ApplicationNotPending`] if the application was decided
/// - [`ConflictReason::RequestNotPending`] if the request is not awaiting a decision
pub fn accept_decision(request: &WalkRequest, application: &Application) -> Result<Decision> {
    if request.status == WalkRequestStatus::Accepted
        && application.status == ApplicationStatus::Accepted
    {
        return Ok(Decision::Repeat);
    }
    ensure_application_pending(application)?;
    ensure_request_pending(request)?;
    Ok(Decision::Apply)
}

/// Decide whether `application` may be rejected for `request`.
///
/// Rejecting an already rejected application is a [`Decision::Repeat`].
///
/// # Errors
///
/// - [`ConflictReason::ApplicationNotPending`] if the application was accepted
/// - [`ConflictReason::RequestNotPending`] if the request is not awaiting a decision
pub fn reject_decision(request: &WalkRequest, application: &Application) -> Result<Decision> {
    if application.status == ApplicationStatus::Rejected {
        return Ok(Decision::Repeat);
    }
    ensure_application_pending(application)?;
    ensure_request_pending(request)?;
    Ok(Decision::Apply)
}

/// Request status once an application has been rejected and `remaining_pending`
/// applications are still waiting.
#[must_use]
pub const fn status_after_reject(remaining_pending: i64) -> WalkRequestStatus {
    if remaining_pending == 0 {
        WalkRequestStatus::Open
    } else {
        WalkRequestStatus::Pending
    }
}

/// Validate a request status change against the lifecycle.
///
/// # Errors
///
/// Returns [`ConflictReason::InvalidTransition`] if the lifecycle forbids it.
pub fn ensure_transition(from: WalkRequestStatus, to: WalkRequestStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::Conflict(ConflictReason::InvalidTransition { from, to }))
    }
}

/// Only completed walks can be rated.
///
/// # Errors
///
/// Returns [`ConflictReason::RequestNotCompleted`] otherwise.
pub fn ensure_rateable(request: &WalkRequest) -> Result<()> {
    if request.status == WalkRequestStatus::Completed {
        Ok(())
    } else {
        Err(EngineError::Conflict(ConflictReason::RequestNotCompleted(request.status)))
    }
}

fn ensure_application_pending(application: &Application) -> Result<()> {
    if application.status == ApplicationStatus::Pending {
        Ok(())
    } else {
        Err(EngineError::Conflict(ConflictReason::ApplicationNotPending(
            application.status,
        )))
    }
}

fn ensure_request_pending(request: &WalkRequest) -> Result<()> {
    if request.status == WalkRequestStatus::Pending {
        Ok(())
    } else {
        Err(EngineError::Conflict(ConflictReason::RequestNotPending(request.status)))
    }
}
