//! # Dogwalk Runtime
//!
//! Caller-side runtime support for the walk-request lifecycle engine.
//!
//! The engine itself is stateless and never retries. This crate holds what a
//! process embedding the engine adds around it:
//!
//! - [`retry`]: exponential backoff, and [`retry::retry_unavailable`] for
//!   re-running an engine operation after a record store outage
//! - [`metrics`]: Prometheus export of the engine counters
//!
//! ## Example
//!
//! ```ignore
//! use dogwalk_runtime::retry::{RetryPolicy, retry_unavailable};
//!
//! let request_id = retry_unavailable(RetryPolicy::default(), || {
//!     engine.create_request(new_request.clone())
//! })
//! .await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use retry::{RetryPolicy, retry_unavailable};
