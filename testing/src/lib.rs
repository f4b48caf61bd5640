//! # Dogwalk Testing
//!
//! Testing utilities for the walk-request lifecycle engine.
//!
//! This crate provides:
//! - [`InMemoryRecordStore`]: serializable in-memory record store with fault injection
//! - [`FixedClock`]: deterministic time
//! - [`helpers`]: seeding helpers for common test scenarios
//!
//! ## Example
//!
//! ```ignore
//! use dogwalk_testing::{helpers, test_engine};
//!
//! #[tokio::test]
//! async fn walker_applies() {
//!     let (engine, store) = test_engine();
//!     let world = helpers::seed(&store).await;
//!     let request_id = engine.create_request(helpers::new_request(world.dog)).await?;
//!
//!     engine.submit_application(request_id, world.walkers[0]).await?;
//!
//!     let request = store.request(request_id).await.unwrap();
//!     assert_eq!(request.status, WalkRequestStatus::Pending);
//! }
//! ```

use chrono::{DateTime, Utc};
use dogwalk_core::engine::LifecycleEngine;
use dogwalk_core::environment::Clock;
use std::sync::Arc;

pub mod in_memory;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use dogwalk_testing::mocks::FixedClock;
    /// use dogwalk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Seeding helpers for engine tests.
pub mod helpers {
    #![allow(clippy::unwrap_used)] // Seeding a fresh store cannot fail

    use crate::in_memory::InMemoryRecordStore;
    use chrono::{TimeZone, Utc};
    use dogwalk_core::types::{DogId, DogSize, NewWalkRequest, UserId, UserRole};

    /// Accounts and a dog registered by [`seed`].
    #[derive(Debug, Clone)]
    pub struct World {
        /// The dog owner
        pub owner: UserId,
        /// The owner's dog
        pub dog: DogId,
        /// Three walkers
        pub walkers: [UserId; 3],
    }

    /// Register one owner with one dog, and three walkers.
    ///
    /// # Panics
    ///
    /// Panics if the store already holds the seeded usernames.
    pub async fn seed(store: &InMemoryRecordStore) -> World {
        let owner = store
            .insert_user("alice", "alice@example.com", UserRole::Owner)
            .await
            .unwrap();
        let dog = store.insert_dog(owner, "Max", DogSize::Medium).await.unwrap();

        let mut walkers = [UserId::new(0); 3];
        for (i, name) in ["bobwalker", "carol", "dave"].into_iter().enumerate() {
            walkers[i] = store
                .insert_user(name, &format!("{name}@example.com"), UserRole::Walker)
                .await
                .unwrap();
        }

        World {
            owner,
            dog,
            walkers,
        }
    }

    /// A valid 30-minute walk request for `dog_id`.
    ///
    /// # Panics
    ///
    /// Only if the hardcoded timestamp were invalid.
    #[must_use]
    pub fn new_request(dog_id: DogId) -> NewWalkRequest {
        NewWalkRequest {
            dog_id,
            requested_time: Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap(),
            duration_minutes: 30,
            location: "Parklands".to_string(),
        }
    }
}

// Re-export commonly used items
pub use in_memory::{InMemoryRecordStore, InMemoryTransaction, StoreOp};
pub use mocks::{FixedClock, test_clock};

/// An engine over a fresh [`InMemoryRecordStore`] with the [`test_clock`].
///
/// The store handle shares its tables with the engine's.
#[must_use]
pub fn test_engine() -> (LifecycleEngine<InMemoryRecordStore>, InMemoryRecordStore) {
    let store = InMemoryRecordStore::new();
    let engine = LifecycleEngine::new(store.clone(), Arc::new(test_clock()));
    (engine, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
