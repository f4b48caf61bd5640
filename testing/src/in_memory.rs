//! In-memory record store for fast, deterministic engine tests.
//!
//! Each transaction holds the store-wide lock from `begin` until it commits,
//! rolls back or is dropped, so transactions are fully serialized. Writes go to
//! a private copy of the tables that replaces the committed tables on commit
//! and is simply discarded otherwise.
//!
//! Ids come from per-table sequences that are not rolled back, like
//! `BIGSERIAL` columns.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned std mutexes panic

use chrono::{DateTime, Utc};
use dogwalk_core::error::{ConflictReason, EngineError, Resource, Result};
use dogwalk_core::record_store::{RecordStore, StoreTransaction};
use dogwalk_core::types::{
    Application, ApplicationId, ApplicationStatus, Dog, DogId, DogSize, NewWalkRating,
    NewWalkRequest, RatingId, User, UserId, UserRole, WalkRating, WalkRequest, WalkRequestId,
    WalkRequestStatus,
};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A store operation that can be made to fail with
/// [`EngineError::Unavailable`] via [`InMemoryRecordStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StoreOp {
    Begin,
    DogExists,
    DogOwner,
    InsertRequest,
    LockRequest,
    FindApplication,
    LoadApplication,
    AcceptedApplication,
    InsertApplication,
    SetRequestStatus,
    SetApplicationStatus,
    RejectOtherApplications,
    RejectPendingApplications,
    CountApplications,
    InsertRating,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    dogs: BTreeMap<DogId, Dog>,
    requests: BTreeMap<WalkRequestId, WalkRequest>,
    applications: BTreeMap<ApplicationId, Application>,
    ratings: BTreeMap<RatingId, WalkRating>,
}

#[derive(Debug, Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Default)]
struct Sequences {
    users: Sequence,
    dogs: Sequence,
    requests: Sequence,
    applications: Sequence,
    ratings: Sequence,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Arc<AsyncMutex<Tables>>,
    sequences: Sequences,
    faults: Mutex<HashSet<StoreOp>>,
}

impl Shared {
    /// Consume an armed fault for `op`, if any.
    fn trip(&self, op: StoreOp) -> Result<()> {
        if self.faults.lock().unwrap().remove(&op) {
            tracing::debug!(?op, "Injected store failure");
            Err(EngineError::Unavailable(format!("injected failure in {op:?}")))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`RecordStore`] with the constraints of the SQL schema.
///
/// Cloning is cheap and clones share the same tables.
///
/// # Example
///
/// ```
/// use dogwalk_testing::InMemoryRecordStore;
/// use dogwalk_core::types::{DogSize, UserRole};
///
/// # async fn example() -> dogwalk_core::Result<()> {
/// let store = InMemoryRecordStore::new();
/// let owner = store.insert_user("alice", "alice@example.com", UserRole::Owner).await?;
/// let dog = store.insert_dog(owner, "Max", DogSize::Medium).await?;
/// # let _ = dog;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    shared: Arc<Shared>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `Unavailable`.
    ///
    /// The fault is consumed by that call; later calls succeed again.
    pub fn fail_next(&self, op: StoreOp) {
        self.shared.faults.lock().unwrap().insert(op);
    }

    /// Register an account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the username or email is taken.
    pub async fn insert_user(
        &self,
        username: &str,
        email: &str,
        role: UserRole,
    ) -> Result<UserId> {
        let mut tables = self.shared.tables.lock().await;
        if tables
            .users
            .values()
            .any(|user| user.username == username || user.email == email)
        {
            return Err(EngineError::InvalidArgument(format!(
                "username or email already registered: {username}"
            )));
        }

        let id = UserId::new(self.shared.sequences.users.next());
        tables.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
                email: email.to_string(),
                role,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    /// Register a dog for an existing owner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound(Owner)` if the owner does not exist.
    pub async fn insert_dog(&self, owner_id: UserId, name: &str, size: DogSize) -> Result<DogId> {
        let mut tables = self.shared.tables.lock().await;
        if !tables.users.contains_key(&owner_id) {
            return Err(EngineError::NotFound(Resource::Owner));
        }

        let id = DogId::new(self.shared.sequences.dogs.next());
        tables.dogs.insert(
            id,
            Dog {
                id,
                owner_id,
                name: name.to_string(),
                size,
            },
        );
        Ok(id)
    }

    /// Committed state of a walk request.
    pub async fn request(&self, request_id: WalkRequestId) -> Option<WalkRequest> {
        self.shared.tables.lock().await.requests.get(&request_id).cloned()
    }

    /// Committed applications of a walk request, in id order.
    pub async fn applications_for(&self, request_id: WalkRequestId) -> Vec<Application> {
        self.shared
            .tables
            .lock()
            .await
            .applications
            .values()
            .filter(|application| application.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Committed rating of a walk request.
    pub async fn rating_for(&self, request_id: WalkRequestId) -> Option<WalkRating> {
        self.shared
            .tables
            .lock()
            .await
            .ratings
            .values()
            .find(|rating| rating.request_id == request_id)
            .cloned()
    }
}

impl RecordStore for InMemoryRecordStore {
    type Transaction = InMemoryTransaction;

    fn begin(&self) -> impl Future<Output = Result<Self::Transaction>> + Send {
        let shared = Arc::clone(&self.shared);
        async move {
            shared.trip(StoreOp::Begin)?;
            let guard = Arc::clone(&shared.tables).lock_owned().await;
            let working = guard.clone();
            Ok(InMemoryTransaction {
                guard,
                working,
                shared,
            })
        }
    }
}

/// Transaction over an [`InMemoryRecordStore`].
///
/// Dropping it without [`StoreTransaction::commit`] discards its writes.
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    shared: Arc<Shared>,
}

impl InMemoryTransaction {
    fn applications_of(
        &mut self,
        request_id: WalkRequestId,
    ) -> impl Iterator<Item = &mut Application> {
        self.working
            .applications
            .values_mut()
            .filter(move |application| application.request_id == request_id)
    }
}

impl StoreTransaction for InMemoryTransaction {
    async fn dog_exists(&mut self, dog_id: DogId) -> Result<bool> {
        self.shared.trip(StoreOp::DogExists)?;
        Ok(self.working.dogs.contains_key(&dog_id))
    }

    async fn dog_owner(&mut self, dog_id: DogId) -> Result<Option<UserId>> {
        self.shared.trip(StoreOp::DogOwner)?;
        Ok(self.working.dogs.get(&dog_id).map(|dog| dog.owner_id))
    }

    async fn insert_request(
        &mut self,
        request: &NewWalkRequest,
        created_at: DateTime<Utc>,
    ) -> Result<WalkRequestId> {
        self.shared.trip(StoreOp::InsertRequest)?;
        if !self.working.dogs.contains_key(&request.dog_id) {
            return Err(EngineError::NotFound(Resource::Dog));
        }
        if request.duration_minutes <= 0 {
            return Err(EngineError::InvalidArgument(
                "duration_minutes violates check constraint".to_string(),
            ));
        }

        let id = WalkRequestId::new(self.shared.sequences.requests.next());
        self.working.requests.insert(
            id,
            WalkRequest {
                id,
                dog_id: request.dog_id,
                requested_time: request.requested_time,
                duration_minutes: request.duration_minutes,
                location: request.location.clone(),
                status: WalkRequestStatus::Open,
                created_at,
            },
        );
        Ok(id)
    }

    async fn lock_request(&mut self, request_id: WalkRequestId) -> Result<Option<WalkRequest>> {
        self.shared.trip(StoreOp::LockRequest)?;
        // The whole store is already locked by this transaction.
        Ok(self.working.requests.get(&request_id).cloned())
    }

    async fn find_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
    ) -> Result<Option<ApplicationId>> {
        self.shared.trip(StoreOp::FindApplication)?;
        Ok(self
            .working
            .applications
            .values()
            .find(|a| a.request_id == request_id && a.walker_id == walker_id)
            .map(|a| a.id))
    }

    async fn load_application(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
    ) -> Result<Option<Application>> {
        self.shared.trip(StoreOp::LoadApplication)?;
        Ok(self
            .working
            .applications
            .get(&application_id)
            .filter(|a| a.request_id == request_id)
            .cloned())
    }

    async fn accepted_application(
        &mut self,
        request_id: WalkRequestId,
    ) -> Result<Option<Application>> {
        self.shared.trip(StoreOp::AcceptedApplication)?;
        Ok(self
            .working
            .applications
            .values()
            .find(|a| a.request_id == request_id && a.status == ApplicationStatus::Accepted)
            .cloned())
    }

    async fn insert_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
        applied_at: DateTime<Utc>,
    ) -> Result<ApplicationId> {
        self.shared.trip(StoreOp::InsertApplication)?;
        if self
            .working
            .applications
            .values()
            .any(|a| a.request_id == request_id && a.walker_id == walker_id)
        {
            return Err(EngineError::Conflict(ConflictReason::AlreadyApplied));
        }
        if !self.working.requests.contains_key(&request_id) {
            return Err(EngineError::NotFound(Resource::Request));
        }
        if !self
            .working
            .users
            .get(&walker_id)
            .is_some_and(|user| user.role == UserRole::Walker)
        {
            return Err(EngineError::NotFound(Resource::Walker));
        }

        let id = ApplicationId::new(self.shared.sequences.applications.next());
        self.working.applications.insert(
            id,
            Application {
                id,
                request_id,
                walker_id,
                status: ApplicationStatus::Pending,
                applied_at,
            },
        );
        Ok(id)
    }

    async fn set_request_status(
        &mut self,
        request_id: WalkRequestId,
        status: WalkRequestStatus,
    ) -> Result<u64> {
        self.shared.trip(StoreOp::SetRequestStatus)?;
        Ok(match self.working.requests.get_mut(&request_id) {
            Some(request) => {
                request.status = status;
                1
            }
            None => 0,
        })
    }

    async fn set_application_status(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
        status: ApplicationStatus,
    ) -> Result<u64> {
        self.shared.trip(StoreOp::SetApplicationStatus)?;
        if status == ApplicationStatus::Accepted
            && self.working.applications.values().any(|a| {
                a.request_id == request_id
                    && a.id != application_id
                    && a.status == ApplicationStatus::Accepted
            })
        {
            return Err(EngineError::Storage(format!(
                "request {request_id} already has an accepted application"
            )));
        }

        Ok(match self.working.applications.get_mut(&application_id) {
            Some(application) if application.request_id == request_id => {
                application.status = status;
                1
            }
            _ => 0,
        })
    }

    async fn reject_other_applications(
        &mut self,
        request_id: WalkRequestId,
        keep: ApplicationId,
    ) -> Result<u64> {
        self.shared.trip(StoreOp::RejectOtherApplications)?;
        let mut changed = 0;
        for application in self.applications_of(request_id) {
            if application.id != keep {
                application.status = ApplicationStatus::Rejected;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn reject_pending_applications(&mut self, request_id: WalkRequestId) -> Result<u64> {
        self.shared.trip(StoreOp::RejectPendingApplications)?;
        let mut changed = 0;
        for application in self.applications_of(request_id) {
            if application.status == ApplicationStatus::Pending {
                application.status = ApplicationStatus::Rejected;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_applications(
        &mut self,
        request_id: WalkRequestId,
        status: ApplicationStatus,
    ) -> Result<i64> {
        self.shared.trip(StoreOp::CountApplications)?;
        let count = self
            .working
            .applications
            .values()
            .filter(|a| a.request_id == request_id && a.status == status)
            .count();
        i64::try_from(count).map_err(|e| EngineError::Storage(e.to_string()))
    }

    async fn insert_rating(
        &mut self,
        rating: &NewWalkRating,
        walker_id: UserId,
        owner_id: UserId,
        rated_at: DateTime<Utc>,
    ) -> Result<RatingId> {
        self.shared.trip(StoreOp::InsertRating)?;
        if self
            .working
            .ratings
            .values()
            .any(|r| r.request_id == rating.request_id)
        {
            return Err(EngineError::Conflict(ConflictReason::AlreadyRated));
        }
        if !self.working.requests.contains_key(&rating.request_id) {
            return Err(EngineError::NotFound(Resource::Request));
        }
        if !self.working.users.contains_key(&walker_id) {
            return Err(EngineError::NotFound(Resource::Walker));
        }
        if !self.working.users.contains_key(&owner_id) {
            return Err(EngineError::NotFound(Resource::Owner));
        }

        let id = RatingId::new(self.shared.sequences.ratings.next());
        self.working.ratings.insert(
            id,
            WalkRating {
                id,
                request_id: rating.request_id,
                walker_id,
                owner_id,
                score: rating.score,
                comments: rating.comments.clone(),
                rated_at,
            },
        );
        Ok(id)
    }

    async fn commit(self) -> Result<()> {
        let Self {
            mut guard,
            working,
            shared,
        } = self;
        shared.trip(StoreOp::Commit)?;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
