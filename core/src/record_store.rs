//! Record store abstraction used by the lifecycle engine.
//!
//! The record store is the durable relational storage behind the engine. The
//! engine never touches it outside a transaction: it calls
//! [`RecordStore::begin`], runs row operations on the returned
//! [`StoreTransaction`], and finishes with exactly one of
//! [`StoreTransaction::commit`] or [`StoreTransaction::rollback`].
//!
//! # Implementations
//!
//! - `PostgresRecordStore` (in `dogwalk-postgres`): production implementation
//! - `InMemoryRecordStore` (in `dogwalk-testing`): fast, deterministic testing
//!
//! # Isolation
//!
//! Implementations must give at least read-committed isolation, and
//! [`StoreTransaction::lock_request`] must hold a lock on the request row until
//! the transaction ends. Every status check the engine makes happens after that
//! lock, which is what serializes competing applications for the same request.
//!
//! # Constraints
//!
//! Implementations enforce the same constraints as the SQL schema:
//! unique `(request_id, walker_id)` for applications (surfaced as
//! `Conflict(AlreadyApplied)`), foreign keys on dog/walker/request references
//! (surfaced as `NotFound`), and one rating per request.

use crate::error::Result;
use crate::types::{
    Application, ApplicationId, ApplicationStatus, DogId, NewWalkRating, NewWalkRequest,
    RatingId, UserId, WalkRequest, WalkRequestId, WalkRequestStatus,
};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Durable storage that hands out transactions.
///
/// Implementations must be `Send + Sync` so one store can be shared by many
/// concurrent callers.
pub trait RecordStore: Send + Sync {
    /// The transaction type handed out by [`RecordStore::begin`].
    type Transaction: StoreTransaction;

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: no connection could be acquired
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction>> + Send;
}

/// Row operations available inside one transaction.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`] must
/// discard every write made through it.
pub trait StoreTransaction: Send {
    /// Whether a dog with this id exists.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn dog_exists(&mut self, dog_id: DogId) -> impl Future<Output = Result<bool>> + Send;

    /// Owner of the dog, if the dog exists.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn dog_owner(&mut self, dog_id: DogId) -> impl Future<Output = Result<Option<UserId>>> + Send;

    /// Insert a walk request with status `open`.
    ///
    /// # Errors
    ///
    /// - `NotFound(Dog)`: foreign key on `dog_id` failed
    /// - `InvalidArgument`: a column check failed
    fn insert_request(
        &mut self,
        request: &NewWalkRequest,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<WalkRequestId>> + Send;

    /// Load a request and lock its row until the transaction ends.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn lock_request(
        &mut self,
        request_id: WalkRequestId,
    ) -> impl Future<Output = Result<Option<WalkRequest>>> + Send;

    /// Id of the walker's application for this request, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn find_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
    ) -> impl Future<Output = Result<Option<ApplicationId>>> + Send;

    /// Load an application, matching both its id and its request.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn load_application(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
    ) -> impl Future<Output = Result<Option<Application>>> + Send;

    /// The accepted application of a request, if any.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn accepted_application(
        &mut self,
        request_id: WalkRequestId,
    ) -> impl Future<Output = Result<Option<Application>>> + Send;

    /// Insert an application with status `pending`.
    ///
    /// # Errors
    ///
    /// - `Conflict(AlreadyApplied)`: unique `(request_id, walker_id)` violated
    /// - `NotFound(Walker)`: no user with the walker role has this id
    /// - `NotFound(Request)`: foreign key failed
    fn insert_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
        applied_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ApplicationId>> + Send;

    /// Set a request's status. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: update failed
    fn set_request_status(
        &mut self,
        request_id: WalkRequestId,
        status: WalkRequestStatus,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Set an application's status, constrained to rows matching both ids.
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: update failed
    fn set_application_status(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
        status: ApplicationStatus,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Reject every application of the request except `keep`.
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: update failed
    fn reject_other_applications(
        &mut self,
        request_id: WalkRequestId,
        keep: ApplicationId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Reject every still-pending application of the request.
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: update failed
    fn reject_pending_applications(
        &mut self,
        request_id: WalkRequestId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Count the request's applications with the given status.
    ///
    /// # Errors
    ///
    /// - `Unavailable`/`Storage`: query failed
    fn count_applications(
        &mut self,
        request_id: WalkRequestId,
        status: ApplicationStatus,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Insert a rating for a completed walk.
    ///
    /// # Errors
    ///
    /// - `Conflict(AlreadyRated)`: the request already has a rating
    fn insert_rating(
        &mut self,
        rating: &NewWalkRating,
        walker_id: UserId,
        owner_id: UserId,
        rated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<RatingId>> + Send;

    /// Make every write of this transaction durable.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the commit failed or its acknowledgement was lost
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard every write of this transaction.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be told; it discards the writes on its own
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
