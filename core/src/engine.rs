//! The lifecycle engine: walk-request and application transitions as
//! single transactions.
//!
//! Every public operation follows the same shape:
//!
//! ```text
//! begin ──▶ operation body (row lock, guards, writes) ──▶ Ok  ──▶ commit
//!                                                    └──▶ Err ──▶ rollback
//! ```
//!
//! The body receives the transaction by `&mut` and never commits on its own,
//! so there is one entry and one exit per operation and the transaction is
//! released on every path. The engine keeps no state between calls.
//!
//! # Example
//!
//! ```ignore
//! use dogwalk_core::engine::LifecycleEngine;
//! use dogwalk_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! let engine = LifecycleEngine::new(store, Arc::new(SystemClock));
//! let request_id = engine.create_request(new_request).await?;
//! let application_id = engine.submit_application(request_id, walker_id).await?;
//! engine.accept_application(request_id, application_id).await?;
//! ```

use crate::environment::Clock;
use crate::error::{ConflictReason, EngineError, Resource, Result};
use crate::lifecycle::{self, Decision};
use crate::record_store::{RecordStore, StoreTransaction};
use crate::types::{
    ApplicationId, ApplicationStatus, NewWalkRating, NewWalkRequest, RatingId, UserId,
    WalkRequest, WalkRequestId, WalkRequestStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Transactional walk-request lifecycle.
///
/// Cheap to share: wrap it in an `Arc` or clone it when the store is `Clone`
/// (a connection pool handle, for instance).
#[derive(Clone)]
pub struct LifecycleEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore> LifecycleEngine<S> {
    /// Create an engine over a record store.
    #[must_use]
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying record store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Post a new walk request with status `open`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: non-positive duration or blank location
    /// - `NotFound(Dog)`: unknown dog
    /// - `Unavailable`: record store failure
    #[tracing::instrument(skip_all, fields(dog_id = %request.dog_id))]
    pub async fn create_request(&self, request: NewWalkRequest) -> Result<WalkRequestId> {
        const OPERATION: &str = "create_request";

        if let Err(err) = request.validate() {
            record_abort(OPERATION, &err);
            return Err(err);
        }

        let mut tx = self.store.begin().await?;
        let outcome = create_in(&mut tx, &request, self.clock.now()).await;
        let request_id = finish(OPERATION, tx, outcome).await?;

        tracing::info!(request_id = %request_id, "Walk request created");
        Ok(request_id)
    }

    /// Apply to an open walk request on behalf of a walker.
    ///
    /// On success the application is `pending` and the request moves to
    /// `pending`, so no further walker can apply until the owner rejects.
    ///
    /// # Errors
    ///
    /// - `Conflict(AlreadyApplied)`: this walker already applied
    /// - `NotFound(Request)` / `NotFound(Walker)`: unknown request or walker
    /// - `Conflict(RequestNotOpen)`: the request is not `open`
    /// - `Unavailable`: record store failure
    #[tracing::instrument(skip_all, fields(request_id = %request_id, walker_id = %walker_id))]
    pub async fn submit_application(
        &self,
        request_id: WalkRequestId,
        walker_id: UserId,
    ) -> Result<ApplicationId> {
        let mut tx = self.store.begin().await?;
        let outcome = submit_in(&mut tx, request_id, walker_id, self.clock.now()).await;
        let application_id = finish("submit_application", tx, outcome).await?;

        tracing::info!(application_id = %application_id, "Application submitted, request pending");
        Ok(application_id)
    }

    /// Accept one application: it becomes `accepted`, the request becomes
    /// `accepted`, and every sibling application becomes `rejected`.
    ///
    /// Calling again with the same arguments after success writes the same
    /// values again and succeeds.
    ///
    /// # Errors
    ///
    /// - `NotFound(Request)` / `NotFound(Application)`: unknown ids, or the
    ///   application belongs to another request
    /// - `Conflict(ApplicationNotPending)`: the application was already decided
    /// - `Conflict(RequestNotPending)`: the request is not awaiting a decision
    /// - `Unavailable`: record store failure
    #[tracing::instrument(
        skip_all,
        fields(request_id = %request_id, application_id = %application_id)
    )]
    pub async fn accept_application(
        &self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
    ) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = accept_in(&mut tx, request_id, application_id).await;
        let (decision, rejected) = finish("accept_application", tx, outcome).await?;

        match decision {
            Decision::Apply => tracing::info!(rejected, "Application accepted"),
            Decision::Repeat => tracing::debug!("Application was already accepted"),
        }
        Ok(())
    }

    /// Reject one application. If no other application is still pending the
    /// request returns to `open`.
    ///
    /// Returns the request status after the transaction.
    ///
    /// # Errors
    ///
    /// - `NotFound(Request)` / `NotFound(Application)`: unknown ids
    /// - `Conflict(ApplicationNotPending)`: the application was accepted
    /// - `Conflict(RequestNotPending)`: the request is not awaiting a decision
    /// - `Unavailable`: record store failure
    #[tracing::instrument(
        skip_all,
        fields(request_id = %request_id, application_id = %application_id)
    )]
    pub async fn reject_application(
        &self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
    ) -> Result<WalkRequestStatus> {
        let mut tx = self.store.begin().await?;
        let outcome = reject_in(&mut tx, request_id, application_id).await;
        let status = finish("reject_application", tx, outcome).await?;

        tracing::info!(status = %status, "Application rejected");
        Ok(status)
    }

    /// Record that an accepted walk took place.
    ///
    /// # Errors
    ///
    /// - `NotFound(Request)`: unknown request
    /// - `Conflict(InvalidTransition)`: the request is not `accepted`
    /// - `Unavailable`: record store failure
    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    pub async fn complete_request(&self, request_id: WalkRequestId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = complete_in(&mut tx, request_id).await;
        finish("complete_request", tx, outcome).await?;

        tracing::info!("Walk request completed");
        Ok(())
    }

    /// Withdraw a request that has not finished yet. Applications still
    /// pending are rejected in the same transaction.
    ///
    /// # Errors
    ///
    /// - `NotFound(Request)`: unknown request
    /// - `Conflict(InvalidTransition)`: the request is `completed` or `cancelled`
    /// - `Unavailable`: record store failure
    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    pub async fn cancel_request(&self, request_id: WalkRequestId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let outcome = cancel_in(&mut tx, request_id).await;
        let rejected = finish("cancel_request", tx, outcome).await?;

        tracing::info!(rejected, "Walk request cancelled");
        Ok(())
    }

    /// Rate a completed walk. The rating is attributed to the accepted walker
    /// and the dog's owner.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: score outside `1..=5`
    /// - `NotFound(Request)`: unknown request
    /// - `Conflict(RequestNotCompleted)`: the walk has not been completed
    /// - `Conflict(AlreadyRated)`: the walk already has a rating
    /// - `Unavailable`: record store failure
    #[tracing::instrument(skip_all, fields(request_id = %rating.request_id, score = rating.score))]
    pub async fn rate_walk(&self, rating: NewWalkRating) -> Result<RatingId> {
        const OPERATION: &str = "rate_walk";

        if let Err(err) = rating.validate() {
            record_abort(OPERATION, &err);
            return Err(err);
        }

        let mut tx = self.store.begin().await?;
        let outcome = rate_in(&mut tx, &rating, self.clock.now()).await;
        let rating_id = finish(OPERATION, tx, outcome).await?;

        tracing::info!(rating_id = %rating_id, "Walk rated");
        Ok(rating_id)
    }
}

/// Commit on `Ok`, roll back on `Err`. The only place a transaction ends.
async fn finish<T, R>(operation: &'static str, tx: T, outcome: Result<R>) -> Result<R>
where
    T: StoreTransaction,
{
    match outcome {
        Ok(value) => match tx.commit().await {
            Ok(()) => {
                metrics::counter!("walk_engine.committed", "operation" => operation).increment(1);
                Ok(value)
            }
            Err(err) => {
                record_abort(operation, &err);
                Err(err)
            }
        },
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    operation,
                    error = %rollback_err,
                    "Rollback failed, store will discard the transaction"
                );
            }
            record_abort(operation, &err);
            Err(err)
        }
    }
}

fn record_abort(operation: &'static str, err: &EngineError) {
    if err.is_retryable() {
        tracing::error!(operation, error = %err, "Transaction aborted by record store");
    } else {
        tracing::warn!(operation, kind = err.kind(), error = %err, "Transaction aborted");
    }
    metrics::counter!("walk_engine.aborted", "operation" => operation, "kind" => err.kind())
        .increment(1);
}

async fn locked_request<T: StoreTransaction>(
    tx: &mut T,
    request_id: WalkRequestId,
) -> Result<WalkRequest> {
    tx.lock_request(request_id)
        .await?
        .ok_or(EngineError::NotFound(Resource::Request))
}

async fn create_in<T: StoreTransaction>(
    tx: &mut T,
    request: &NewWalkRequest,
    now: DateTime<Utc>,
) -> Result<WalkRequestId> {
    if !tx.dog_exists(request.dog_id).await? {
        return Err(EngineError::NotFound(Resource::Dog));
    }
    tx.insert_request(request, now).await
}

async fn submit_in<T: StoreTransaction>(
    tx: &mut T,
    request_id: WalkRequestId,
    walker_id: UserId,
    now: DateTime<Utc>,
) -> Result<ApplicationId> {
    if tx.find_application(request_id, walker_id).await?.is_some() {
        return Err(EngineError::Conflict(ConflictReason::AlreadyApplied));
    }

    let request = locked_request(tx, request_id).await?;
    lifecycle::ensure_open(&request)?;

    let application_id = tx.insert_application(request_id, walker_id, now).await?;
    tx.set_request_status(request_id, WalkRequestStatus::Pending)
        .await?;
    Ok(application_id)
}

async fn accept_in<T: StoreTransaction>(
    tx: &mut T,
    request_id: WalkRequestId,
    application_id: ApplicationId,
) -> Result<(Decision, u64)> {
    let request = locked_request(tx, request_id).await?;
    let application = tx
        .load_application(request_id, application_id)
        .await?
        .ok_or(EngineError::NotFound(Resource::Application))?;
    let decision = lifecycle::accept_decision(&request, &application)?;

    // A repeat writes the same terminal values again.
    tx.set_application_status(request_id, application_id, ApplicationStatus::Accepted)
        .await?;
    tx.set_request_status(request_id, WalkRequestStatus::Accepted)
        .await?;
    let rejected = tx.reject_other_applications(request_id, application_id).await?;
    Ok((decision, rejected))
}

async fn reject_in<T: StoreTransaction>(
    tx: &mut T,
    request_id: WalkRequestId,
    application_id: ApplicationId,
) -> Result<WalkRequestStatus> {
    let request = locked_request(tx, request_id).await?;
    let application = tx
        .load_application(request_id, application_id)
        .await?
        .ok_or(EngineError::NotFound(Resource::Application))?;

    if lifecycle::reject_decision(&request, &application)? == Decision::Repeat {
        return Ok(request.status);
    }

    tx.set_application_status(request_id, application_id, ApplicationStatus::Rejected)
        .await?;
    let remaining = tx
        .count_applications(request_id, ApplicationStatus::Pending)
        .await?;

    let next = lifecycle::status_after_reject(remaining);
    if next != request.status {
        tx.set_request_status(request_id, next).await?;
    }
    Ok(next)
}

async fn complete_in<T: StoreTransaction>(tx: &mut T, request_id: WalkRequestId) -> Result<()> {
    let request = locked_request(tx, request_id).await?;
    lifecycle::ensure_transition(request.status, WalkRequestStatus::Completed)?;
    tx.set_request_status(request_id, WalkRequestStatus::Completed)
        .await?;
    Ok(())
}

async fn cancel_in<T: StoreTransaction>(tx: &mut T, request_id: WalkRequestId) -> Result<u64> {
    let request = locked_request(tx, request_id).await?;
    lifecycle::ensure_transition(request.status, WalkRequestStatus::Cancelled)?;
    let rejected = tx.reject_pending_applications(request_id).await?;
    tx.set_request_status(request_id, WalkRequestStatus::Cancelled)
        .await?;
    Ok(rejected)
}

async fn rate_in<T: StoreTransaction>(
    tx: &mut T,
    rating: &NewWalkRating,
    now: DateTime<Utc>,
) -> Result<RatingId> {
    let request = locked_request(tx, rating.request_id).await?;
    lifecycle::ensure_rateable(&request)?;

    let walker_id = tx
        .accepted_application(rating.request_id)
        .await?
        .map(|application| application.walker_id)
        .ok_or_else(|| {
            EngineError::Storage(format!(
                "completed request {} has no accepted application",
                rating.request_id
            ))
        })?;
    let owner_id = tx
        .dog_owner(request.dog_id)
        .await?
        .ok_or(EngineError::NotFound(Resource::Dog))?;

    tx.insert_rating(rating, walker_id, owner_id, now).await
}
