//! # Dogwalk Core
//!
//! Walk-request lifecycle and application arbitration.
//!
//! Owners post walk requests for their dogs, walkers apply, and owners accept
//! or reject applications. Every operation runs as a single transaction
//! against a [`record_store::RecordStore`], so concurrent callers racing for
//! the same request observe a serial order and never see a partial update.
//!
//! ## Modules
//!
//! - [`types`]: identifiers, statuses, rows and commands
//! - [`error`]: the engine error taxonomy
//! - [`lifecycle`]: pure transition rules
//! - [`record_store`]: the transactional storage seam
//! - [`engine`]: the operations, one transaction each
//! - [`environment`]: injected dependencies (the clock)
//!
//! ## Request lifecycle
//!
//! ```text
//! open ──apply──▶ pending ──accept──▶ accepted ──complete──▶ completed
//!   ▲               │
//!   └──last reject──┘        (open, pending, accepted) ──cancel──▶ cancelled
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dogwalk_core::engine::LifecycleEngine;
//! use dogwalk_core::environment::SystemClock;
//!
//! let engine = LifecycleEngine::new(store, Arc::new(SystemClock));
//! let request_id = engine.create_request(NewWalkRequest { .. }).await?;
//! let application_id = engine.submit_application(request_id, walker_id).await?;
//! engine.accept_application(request_id, application_id).await?;
//! ```

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod record_store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use engine::LifecycleEngine;
pub use error::{ConflictReason, EngineError, Resource, Result};
pub use record_store::{RecordStore, StoreTransaction};
pub use types::{
    Application, ApplicationId, ApplicationStatus, Dog, DogId, DogSize, NewWalkRating,
    NewWalkRequest, RatingId, User, UserId, UserRole, WalkRating, WalkRequest, WalkRequestId,
    WalkRequestStatus,
};

/// Environment module - Dependency injection traits
///
/// External dependencies the engine needs beyond the record store are
/// abstracted behind traits and injected when the engine is built.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The engine stamps `created_at`, `applied_at` and `rated_at` with
    /// [`Clock::now`].
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
