//! Domain types for the walk-request lifecycle.
//!
//! Identifiers are thin newtypes over the `BIGSERIAL` keys assigned by the
//! record store. Statuses are closed enums with a stable lowercase string form,
//! which is what the store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, ParseStatusError, Result};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store key.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw store key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of an owner or walker account.
    UserId
);
row_id!(
    /// Identifier of a dog.
    DogId
);
row_id!(
    /// Identifier of a walk request.
    WalkRequestId
);
row_id!(
    /// Identifier of a walker's application to a walk request.
    ApplicationId
);
row_id!(
    /// Identifier of a walk rating.
    RatingId
);

// ============================================================================
// Statuses
// ============================================================================

/// Lifecycle status of a [`WalkRequest`].
///
/// ```text
/// open ──apply──▶ pending ──accept──▶ accepted ──▶ completed
///   ▲               │                    │
///   └──last reject──┘                    └──────▶ cancelled
/// ```
///
/// `open` and `pending` may also be cancelled by the owner. `completed` and
/// `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkRequestStatus {
    /// Accepting applications
    Open,
    /// Reserved by a pending application, awaiting the owner's decision
    Pending,
    /// A walker has been chosen
    Accepted,
    /// The walk took place
    Completed,
    /// Withdrawn by the owner
    Cancelled,
}

impl WalkRequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::Pending,
        Self::Accepted,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseStatusError`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseStatusError::new("walk request", s)),
        }
    }

    /// No transition leaves a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Pending | Self::Cancelled)
                | (Self::Pending, Self::Open | Self::Accepted | Self::Cancelled)
                | (Self::Accepted, Self::Completed | Self::Cancelled)
        )
    }
}

impl fmt::Display for WalkRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an [`Application`].
///
/// `pending` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    /// Waiting for the owner's decision
    Pending,
    /// Chosen by the owner
    Accepted,
    /// Declined by the owner, or superseded by another acceptance
    Rejected,
}

impl ApplicationStatus {
    /// All statuses.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Accepted, Self::Rejected];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseStatusError`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseStatusError::new("application", s)),
        }
    }

    /// Accepted and rejected applications never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted | Self::Rejected)
        )
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Posts walk requests for their dogs
    Owner,
    /// Applies to walk requests
    Walker,
}

impl UserRole {
    /// Convert role to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Walker => "walker",
        }
    }

    /// Parse role from database string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseStatusError`] for unknown roles.
    pub fn parse(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "owner" => Ok(Self::Owner),
            "walker" => Ok(Self::Walker),
            _ => Err(ParseStatusError::new("user role", s)),
        }
    }
}

/// Dog size category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DogSize {
    /// Small
    Small,
    /// Medium
    Medium,
    /// Large
    Large,
}

impl DogSize {
    /// Convert size to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Parse size from database string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseStatusError`] for unknown sizes.
    pub fn parse(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            _ => Err(ParseStatusError::new("dog size", s)),
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// An owner or walker account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id
    pub id: UserId,
    /// Unique login name
    pub username: String,
    /// Unique email address
    pub email: String,
    /// Owner or walker
    pub role: UserRole,
    /// When the account was created
    pub created_at: DateTime<Utc>,
}

/// A dog, owned by exactly one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dog {
    /// Dog id
    pub id: DogId,
    /// Owning account
    pub owner_id: UserId,
    /// Dog's name
    pub name: String,
    /// Size category
    pub size: DogSize,
}

/// An owner's posted need for a dog walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkRequest {
    /// Request id
    pub id: WalkRequestId,
    /// The dog to be walked
    pub dog_id: DogId,
    /// When the walk should start
    pub requested_time: DateTime<Utc>,
    /// Walk length in minutes (always positive)
    pub duration_minutes: i32,
    /// Meeting point
    pub location: String,
    /// Lifecycle status
    pub status: WalkRequestStatus,
    /// When the request was posted
    pub created_at: DateTime<Utc>,
}

/// A walker's bid to fulfill a walk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application id
    pub id: ApplicationId,
    /// The request applied to
    pub request_id: WalkRequestId,
    /// The applying walker
    pub walker_id: UserId,
    /// Decision status
    pub status: ApplicationStatus,
    /// When the walker applied
    pub applied_at: DateTime<Utc>,
}

/// An owner's rating of a completed walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkRating {
    /// Rating id
    pub id: RatingId,
    /// The rated walk (one rating per walk)
    pub request_id: WalkRequestId,
    /// Walker of the accepted application
    pub walker_id: UserId,
    /// Owner of the walked dog
    pub owner_id: UserId,
    /// Score between [`WalkRating::MIN_SCORE`] and [`WalkRating::MAX_SCORE`]
    pub score: i16,
    /// Free-form remarks
    pub comments: Option<String>,
    /// When the rating was recorded
    pub rated_at: DateTime<Utc>,
}

impl WalkRating {
    /// Lowest allowed score.
    pub const MIN_SCORE: i16 = 1;
    /// Highest allowed score.
    pub const MAX_SCORE: i16 = 5;
}

// ============================================================================
// Commands
// ============================================================================

/// Input for creating a walk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWalkRequest {
    /// The dog to be walked
    pub dog_id: DogId,
    /// When the walk should start
    pub requested_time: DateTime<Utc>,
    /// Walk length in minutes
    pub duration_minutes: i32,
    /// Meeting point
    pub location: String,
}

impl NewWalkRequest {
    /// Check field constraints that don't need the record store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if the duration is not positive
    /// or the location is blank.
    pub fn validate(&self) -> Result<()> {
        if self.duration_minutes <= 0 {
            return Err(EngineError::InvalidArgument(format!(
                "duration_minutes must be positive, got {}",
                self.duration_minutes
            )));
        }
        if self.location.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "location must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for rating a completed walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWalkRating {
    /// The walk being rated
    pub request_id: WalkRequestId,
    /// Score between 1 and 5
    pub score: i16,
    /// Free-form remarks
    pub comments: Option<String>,
}

impl NewWalkRating {
    /// Check the score range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] for scores outside `1..=5`.
    pub fn validate(&self) -> Result<()> {
        if !(WalkRating::MIN_SCORE..=WalkRating::MAX_SCORE).contains(&self.score) {
            return Err(EngineError::InvalidArgument(format!(
                "score must be between {} and {}, got {}",
                WalkRating::MIN_SCORE,
                WalkRating::MAX_SCORE,
                self.score
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn new_request(duration_minutes: i32, location: &str) -> NewWalkRequest {
        NewWalkRequest {
            dog_id: DogId::new(1),
            requested_time: Utc::now(),
            duration_minutes,
            location: location.to_string(),
        }
    }

    #[test]
    fn request_status_roundtrip() {
        for status in WalkRequestStatus::ALL {
            let parsed =
                WalkRequestStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn application_status_invalid() {
        let err = ApplicationStatus::parse("withdrawn").unwrap_err();
        assert!(err.to_string().contains("withdrawn"));
    }

    #[test]
    fn terminal_request_statuses() {
        assert!(WalkRequestStatus::Completed.is_terminal());
        assert!(WalkRequestStatus::Cancelled.is_terminal());
        assert!(!WalkRequestStatus::Accepted.is_terminal());
    }

    #[test]
    fn pending_can_reopen_but_accepted_cannot() {
        assert!(WalkRequestStatus::Pending.can_transition_to(WalkRequestStatus::Open));
        assert!(!WalkRequestStatus::Accepted.can_transition_to(WalkRequestStatus::Open));
        assert!(!WalkRequestStatus::Open.can_transition_to(WalkRequestStatus::Accepted));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&WalkRequestStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let id = serde_json::to_string(&WalkRequestId::new(42)).unwrap();
        assert_eq!(id, "42");
    }

    #[test]
    fn new_request_rejects_non_positive_duration() {
        assert!(matches!(
            new_request(0, "Park").validate(),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(new_request(-15, "Park").validate().is_err());
    }

    #[test]
    fn new_request_rejects_blank_location() {
        assert!(new_request(30, "   ").validate().is_err());
        assert!(new_request(30, "Parklands").validate().is_ok());
    }

    #[test]
    fn rating_score_bounds() {
        let rating = |score| NewWalkRating {
            request_id: WalkRequestId::new(1),
            score,
            comments: None,
        };
        assert!(rating(0).validate().is_err());
        assert!(rating(1).validate().is_ok());
        assert!(rating(5).validate().is_ok());
        assert!(rating(6).validate().is_err());
    }
}
