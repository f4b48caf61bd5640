//! Prometheus export of the lifecycle engine metrics.
//!
//! The engine records plain `metrics` counters and never installs a recorder
//! itself. Binaries call [`EngineMetrics::install`] once at startup and render
//! the snapshot wherever they expose it.
//!
//! Recorded metrics:
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `walk_engine.committed` | counter | `operation` |
//! | `walk_engine.aborted` | counter | `operation`, `kind` |
//! | `walk_engine.retries` | counter | |
//!
//! # Example
//!
//! ```rust,no_run
//! use dogwalk_runtime::metrics::EngineMetrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = EngineMetrics::install()?;
//! // ... run engine operations ...
//! println!("{}", metrics.render());
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct EngineMetrics {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

impl EngineMetrics {
    /// Install the Prometheus recorder as the global recorder and describe the
    /// engine metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a global recorder is already set.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        describe();
        tracing::debug!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe() {
    describe_counter!(
        "walk_engine.committed",
        "Engine operations whose transaction committed"
    );
    describe_counter!(
        "walk_engine.aborted",
        "Engine operations that failed and rolled back, by error kind"
    );
    describe_counter!(
        "walk_engine.retries",
        "Caller-side retries after a retryable failure"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_counters() {
        // Only one global recorder per process; this is the only test installing one.
        let metrics = EngineMetrics::install().unwrap();

        metrics::counter!("walk_engine.committed", "operation" => "submit_application")
            .increment(1);
        metrics::counter!(
            "walk_engine.aborted",
            "operation" => "submit_application",
            "kind" => "conflict"
        )
        .increment(2);

        let rendered = metrics.render();
        assert!(rendered.contains("walk_engine_committed"));
        assert!(rendered.contains("kind=\"conflict\""));
    }
}
