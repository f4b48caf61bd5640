//! `PostgreSQL` implementation of the record store.
//!
//! Each engine transaction is one `sqlx` transaction. `begin` sets the
//! configured isolation level and a transaction-local `statement_timeout`;
//! [`StoreTransaction::lock_request`] is a `SELECT ... FOR UPDATE` on the
//! request row, which serializes competing applications and decisions.
//!
//! The schema lives in `migrations/` and is applied with
//! [`PostgresRecordStore::migrate`].

use crate::config::{IsolationLevel, PostgresConfig};
use crate::error::{Violation, map_sqlx_error, violation};
use chrono::{DateTime, Utc};
use dogwalk_core::error::{ConflictReason, EngineError, Resource, Result};
use dogwalk_core::record_store::{RecordStore, StoreTransaction};
use dogwalk_core::types::{
    Application, ApplicationId, ApplicationStatus, DogId, DogSize, NewWalkRating, NewWalkRequest,
    RatingId, UserId, UserRole, WalkRating, WalkRequest, WalkRequestId, WalkRequestStatus,
};
use sqlx::{PgPool, Postgres};
use std::time::Duration;

const REQUEST_COLUMNS: &str =
    "request_id, dog_id, requested_time, duration_minutes, location, status, created_at";
const APPLICATION_COLUMNS: &str = "application_id, request_id, walker_id, status, applied_at";

#[derive(sqlx::FromRow)]
struct RequestRow {
    request_id: i64,
    dog_id: i64,
    requested_time: DateTime<Utc>,
    duration_minutes: i32,
    location: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for WalkRequest {
    type Error = EngineError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Self {
            id: WalkRequestId::new(row.request_id),
            dog_id: DogId::new(row.dog_id),
            requested_time: row.requested_time,
            duration_minutes: row.duration_minutes,
            location: row.location,
            status: WalkRequestStatus::parse(&row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    application_id: i64,
    request_id: i64,
    walker_id: i64,
    status: String,
    applied_at: DateTime<Utc>,
}

impl TryFrom<ApplicationRow> for Application {
    type Error = EngineError;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        Ok(Self {
            id: ApplicationId::new(row.application_id),
            request_id: WalkRequestId::new(row.request_id),
            walker_id: UserId::new(row.walker_id),
            status: ApplicationStatus::parse(&row.status)?,
            applied_at: row.applied_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RatingRow {
    rating_id: i64,
    request_id: i64,
    walker_id: i64,
    owner_id: i64,
    score: i16,
    comments: Option<String>,
    rated_at: DateTime<Utc>,
}

impl From<RatingRow> for WalkRating {
    fn from(row: RatingRow) -> Self {
        Self {
            id: RatingId::new(row.rating_id),
            request_id: WalkRequestId::new(row.request_id),
            walker_id: UserId::new(row.walker_id),
            owner_id: UserId::new(row.owner_id),
            score: row.score,
            comments: row.comments,
            rated_at: row.rated_at,
        }
    }
}

/// `PostgreSQL`-backed [`RecordStore`].
///
/// Cloning is cheap: clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use dogwalk_postgres::{PostgresConfig, PostgresRecordStore};
///
/// # async fn example() -> dogwalk_core::Result<()> {
/// let store = PostgresRecordStore::connect(&PostgresConfig::from_env()).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresRecordStore {
    pool: PgPool,
    isolation: IsolationLevel,
    statement_timeout: Option<Duration>,
}

impl PostgresRecordStore {
    /// Wrap an existing pool with `read committed` isolation and no statement
    /// timeout.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            isolation: IsolationLevel::ReadCommitted,
            statement_timeout: None,
        }
    }

    /// Wrap an existing pool using the transaction settings of `config`.
    #[must_use]
    pub const fn with_config(pool: PgPool, config: &PostgresConfig) -> Self {
        Self {
            pool,
            isolation: config.isolation_level,
            statement_timeout: Some(config.statement_timeout()),
        }
    }

    /// Build a pool from `config` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = config.connect().await?;
        Ok(Self::with_config(pool, config))
    }

    /// Override the isolation level of engine transactions.
    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Register an account.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: username or email already registered
    /// - `Unavailable`/`Storage`: insert failed
    pub async fn insert_user(&self, username: &str, email: &str, role: UserRole) -> Result<UserId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, email, role) VALUES ($1, $2, $3) RETURNING user_id",
        )
        .bind(username)
        .bind(email)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique(_)) => EngineError::InvalidArgument(format!(
                "username or email already registered: {username}"
            )),
            _ => map_sqlx_error("insert user", e),
        })?;
        Ok(UserId::new(id))
    }

    /// Register a dog for an existing owner.
    ///
    /// # Errors
    ///
    /// - `NotFound(Owner)`: unknown owner
    /// - `Unavailable`/`Storage`: insert failed
    pub async fn insert_dog(&self, owner_id: UserId, name: &str, size: DogSize) -> Result<DogId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO dogs (owner_id, name, size) VALUES ($1, $2, $3) RETURNING dog_id",
        )
        .bind(owner_id.get())
        .bind(name)
        .bind(size.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::ForeignKey(_)) => EngineError::NotFound(Resource::Owner),
            _ => map_sqlx_error("insert dog", e),
        })?;
        Ok(DogId::new(id))
    }

    /// Committed state of a walk request.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`/`Storage` if the query or row decoding fails.
    pub async fn request(&self, request_id: WalkRequestId) -> Result<Option<WalkRequest>> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM walk_requests WHERE request_id = $1");
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load walk request", e))?
            .map(WalkRequest::try_from)
            .transpose()
    }

    /// Committed applications of a walk request, in id order.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`/`Storage` if the query or row decoding fails.
    pub async fn applications_for(&self, request_id: WalkRequestId) -> Result<Vec<Application>> {
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM walk_applications \
             WHERE request_id = $1 ORDER BY application_id"
        );
        sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(request_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list applications", e))?
            .into_iter()
            .map(Application::try_from)
            .collect()
    }

    /// Committed rating of a walk request.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`/`Storage` if the query fails.
    pub async fn rating_for(&self, request_id: WalkRequestId) -> Result<Option<WalkRating>> {
        let row = sqlx::query_as::<_, RatingRow>(
            "SELECT rating_id, request_id, walker_id, owner_id, score, comments, rated_at \
             FROM walk_ratings WHERE request_id = $1",
        )
        .bind(request_id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load rating", e))?;
        Ok(row.map(WalkRating::from))
    }
}

impl RecordStore for PostgresRecordStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Must be the first statement of the transaction.
        let isolation = format!("SET TRANSACTION ISOLATION LEVEL {}", self.isolation.as_sql());
        sqlx::query(&isolation)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set isolation level", e))?;

        if let Some(timeout) = self.statement_timeout {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set statement timeout", e))?;
        }

        tracing::debug!(isolation = %self.isolation, "Transaction started");
        Ok(PostgresTransaction { tx })
    }
}

/// An open `PostgreSQL` transaction.
///
/// Dropping it without [`StoreTransaction::commit`] rolls it back when the
/// connection returns to the pool.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl StoreTransaction for PostgresTransaction {
    async fn dog_exists(&mut self, dog_id: DogId) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM dogs WHERE dog_id = $1)")
            .bind(dog_id.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("check dog", e))
    }

    async fn dog_owner(&mut self, dog_id: DogId) -> Result<Option<UserId>> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT owner_id FROM dogs WHERE dog_id = $1")
            .bind(dog_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load dog owner", e))?;
        Ok(owner.map(UserId::new))
    }

    async fn insert_request(
        &mut self,
        request: &NewWalkRequest,
        created_at: DateTime<Utc>,
    ) -> Result<WalkRequestId> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO walk_requests
                (dog_id, requested_time, duration_minutes, location, status, created_at)
            VALUES ($1, $2, $3, $4, 'open', $5)
            RETURNING request_id
            ",
        )
        .bind(request.dog_id.get())
        .bind(request.requested_time)
        .bind(request.duration_minutes)
        .bind(&request.location)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::ForeignKey(_)) => EngineError::NotFound(Resource::Dog),
            Some(Violation::Check(constraint)) => EngineError::InvalidArgument(format!(
                "walk request violates {}",
                constraint.unwrap_or("a check constraint")
            )),
            _ => map_sqlx_error("insert walk request", e),
        })?;
        Ok(WalkRequestId::new(id))
    }

    async fn lock_request(&mut self, request_id: WalkRequestId) -> Result<Option<WalkRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM walk_requests WHERE request_id = $1 FOR UPDATE"
        );
        sqlx::query_as::<_, RequestRow>(&sql)
            .bind(request_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock walk request", e))?
            .map(WalkRequest::try_from)
            .transpose()
    }

    async fn find_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
    ) -> Result<Option<ApplicationId>> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT application_id FROM walk_applications WHERE request_id = $1 AND walker_id = $2",
        )
        .bind(request_id.get())
        .bind(walker_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find application", e))?;
        Ok(id.map(ApplicationId::new))
    }

    async fn load_application(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
    ) -> Result<Option<Application>> {
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM walk_applications \
             WHERE application_id = $1 AND request_id = $2"
        );
        sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(application_id.get())
            .bind(request_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load application", e))?
            .map(Application::try_from)
            .transpose()
    }

    async fn accepted_application(
        &mut self,
        request_id: WalkRequestId,
    ) -> Result<Option<Application>> {
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM walk_applications \
             WHERE request_id = $1 AND status = 'accepted'"
        );
        sqlx::query_as::<_, ApplicationRow>(&sql)
            .bind(request_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load accepted application", e))?
            .map(Application::try_from)
            .transpose()
    }

    async fn insert_application(
        &mut self,
        request_id: WalkRequestId,
        walker_id: UserId,
        applied_at: DateTime<Utc>,
    ) -> Result<ApplicationId> {
        // Only users with the walker role may apply; no row means no walker.
        let id: Option<i64> = sqlx::query_scalar(
            r"
            INSERT INTO walk_applications (request_id, walker_id, status, applied_at)
            SELECT $1, user_id, 'pending', $3
            FROM users
            WHERE user_id = $2 AND role = 'walker'
            RETURNING application_id
            ",
        )
        .bind(request_id.get())
        .bind(walker_id.get())
        .bind(applied_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique(_)) => EngineError::Conflict(ConflictReason::AlreadyApplied),
            Some(Violation::ForeignKey(Some("walk_applications_walker_id_fkey"))) => {
                EngineError::NotFound(Resource::Walker)
            }
            Some(Violation::ForeignKey(_)) => EngineError::NotFound(Resource::Request),
            _ => map_sqlx_error("insert application", e),
        })?;
        id.map(ApplicationId::new)
            .ok_or(EngineError::NotFound(Resource::Walker))
    }

    async fn set_request_status(
        &mut self,
        request_id: WalkRequestId,
        status: WalkRequestStatus,
    ) -> Result<u64> {
        let result = sqlx::query("UPDATE walk_requests SET status = $2 WHERE request_id = $1")
            .bind(request_id.get())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update walk request status", e))?;
        Ok(result.rows_affected())
    }

    async fn set_application_status(
        &mut self,
        request_id: WalkRequestId,
        application_id: ApplicationId,
        status: ApplicationStatus,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE walk_applications SET status = $3 WHERE application_id = $1 AND request_id = $2",
        )
        .bind(application_id.get())
        .bind(request_id.get())
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update application status", e))?;
        Ok(result.rows_affected())
    }

    async fn reject_other_applications(
        &mut self,
        request_id: WalkRequestId,
        keep: ApplicationId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE walk_applications
            SET status = 'rejected'
            WHERE request_id = $1 AND application_id <> $2
            ",
        )
        .bind(request_id.get())
        .bind(keep.get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reject other applications", e))?;
        Ok(result.rows_affected())
    }

    async fn reject_pending_applications(&mut self, request_id: WalkRequestId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE walk_applications SET status = 'rejected' WHERE request_id = $1 AND status = 'pending'",
        )
        .bind(request_id.get())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reject pending applications", e))?;
        Ok(result.rows_affected())
    }

    async fn count_applications(
        &mut self,
        request_id: WalkRequestId,
        status: ApplicationStatus,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM walk_applications WHERE request_id = $1 AND status = $2",
        )
        .bind(request_id.get())
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("count applications", e))
    }

    async fn insert_rating(
        &mut self,
        rating: &NewWalkRating,
        walker_id: UserId,
        owner_id: UserId,
        rated_at: DateTime<Utc>,
    ) -> Result<RatingId> {
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO walk_ratings (request_id, walker_id, owner_id, score, comments, rated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING rating_id
            ",
        )
        .bind(rating.request_id.get())
        .bind(walker_id.get())
        .bind(owner_id.get())
        .bind(rating.score)
        .bind(rating.comments.as_deref())
        .bind(rated_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique(_)) => EngineError::Conflict(ConflictReason::AlreadyRated),
            Some(Violation::ForeignKey(Some("walk_ratings_walker_id_fkey"))) => {
                EngineError::NotFound(Resource::Walker)
            }
            Some(Violation::ForeignKey(Some("walk_ratings_owner_id_fkey"))) => {
                EngineError::NotFound(Resource::Owner)
            }
            Some(Violation::ForeignKey(_)) => EngineError::NotFound(Resource::Request),
            Some(Violation::Check(_)) => EngineError::InvalidArgument(format!(
                "score must be between {} and {}",
                WalkRating::MIN_SCORE,
                WalkRating::MAX_SCORE
            )),
            _ => map_sqlx_error("insert rating", e),
        })?;
        Ok(RatingId::new(id))
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}
