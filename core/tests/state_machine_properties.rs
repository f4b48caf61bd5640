//! Property tests for the walk-request and application state machines.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use dogwalk_core::lifecycle::{self, Decision};
use dogwalk_core::types::{
    Application, ApplicationId, ApplicationStatus, DogId, UserId, WalkRequest, WalkRequestId,
    WalkRequestStatus,
};
use dogwalk_core::{ConflictReason, EngineError};
use proptest::prelude::*;

fn request_status() -> impl Strategy<Value = WalkRequestStatus> {
    prop::sample::select(WalkRequestStatus::ALL.to_vec())
}

fn application_status() -> impl Strategy<Value = ApplicationStatus> {
    prop::sample::select(ApplicationStatus::ALL.to_vec())
}

fn request(status: WalkRequestStatus) -> WalkRequest {
    let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    WalkRequest {
        id: WalkRequestId::new(1),
        dog_id: DogId::new(1),
        requested_time: at,
        duration_minutes: 45,
        location: "Riverside".to_string(),
        status,
        created_at: at,
    }
}

fn application(status: ApplicationStatus) -> Application {
    Application {
        id: ApplicationId::new(1),
        request_id: WalkRequestId::new(1),
        walker_id: UserId::new(2),
        status,
        applied_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, 5, 0).unwrap(),
    }
}

proptest! {
    #[test]
    fn terminal_request_statuses_have_no_exits(from in request_status(), to in request_status()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
            prop_assert!(lifecycle::ensure_transition(from, to).is_err());
        }
    }

    #[test]
    fn no_request_status_transitions_to_itself(status in request_status()) {
        prop_assert!(!status.can_transition_to(status));
    }

    #[test]
    fn decided_applications_never_change(from in application_status(), to in application_status()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    #[test]
    fn accept_applies_only_to_pending_pairs(
        request_status in request_status(),
        application_status in application_status(),
    ) {
        let decision = lifecycle::accept_decision(
            &request(request_status),
            &application(application_status),
        );
        match decision {
            Ok(Decision::Apply) => {
                prop_assert_eq!(request_status, WalkRequestStatus::Pending);
                prop_assert_eq!(application_status, ApplicationStatus::Pending);
            }
            Ok(Decision::Repeat) => {
                prop_assert_eq!(request_status, WalkRequestStatus::Accepted);
                prop_assert_eq!(application_status, ApplicationStatus::Accepted);
            }
            Err(err) => prop_assert!(matches!(err, EngineError::Conflict(_))),
        }
    }

    #[test]
    fn reject_never_touches_accepted_application(request_status in request_status()) {
        let decision = lifecycle::reject_decision(
            &request(request_status),
            &application(ApplicationStatus::Accepted),
        );
        prop_assert_eq!(
            decision,
            Err(EngineError::Conflict(ConflictReason::ApplicationNotPending(
                ApplicationStatus::Accepted
            )))
        );
    }

    #[test]
    fn reject_result_is_open_or_pending(remaining in 0_i64..1_000) {
        let next = lifecycle::status_after_reject(remaining);
        prop_assert_eq!(next == WalkRequestStatus::Open, remaining == 0);
        prop_assert!(
            WalkRequestStatus::Pending == next
                || WalkRequestStatus::Pending.can_transition_to(next)
        );
    }

    #[test]
    fn status_strings_roundtrip(status in request_status()) {
        prop_assert_eq!(WalkRequestStatus::parse(status.as_str()).unwrap(), status);
    }
}
