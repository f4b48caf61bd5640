//! `PostgreSQL` record store for the walk-request lifecycle engine.
//!
//! This crate provides a production-ready PostgreSQL-based record store that
//! implements the `RecordStore` trait from `dogwalk-core`. It uses sqlx with
//! runtime-checked queries and supports:
//!
//! - Row locking (`SELECT ... FOR UPDATE`) on walk requests
//! - Configurable isolation level and statement timeout
//! - Connection pooling configured from the environment
//! - Embedded schema migrations
//!
//! # Example
//!
//! ```ignore
//! use dogwalk_core::{LifecycleEngine, environment::SystemClock};
//! use dogwalk_postgres::{PostgresConfig, PostgresRecordStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresRecordStore::connect(&PostgresConfig::from_env()).await?;
//!     store.migrate().await?;
//!     let engine = LifecycleEngine::new(store, Arc::new(SystemClock));
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod store;

pub use config::{IsolationLevel, PostgresConfig};
pub use store::{PostgresRecordStore, PostgresTransaction};
