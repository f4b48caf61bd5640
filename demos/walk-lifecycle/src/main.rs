//! Walk-request lifecycle demo.
//!
//! Runs one arbitration round end to end against `PostgreSQL`:
//!
//! 1. An owner posts a walk request for their dog.
//! 2. Walker A applies; the request becomes pending.
//! 3. Walker B applies too late and is turned away.
//! 4. The owner rejects A; the request reopens.
//! 5. B applies again and is accepted.
//! 6. The walk is completed and rated.
//!
//! Configure the database with `DATABASE_URL` (a `.env` file is read if
//! present) and the log level with `RUST_LOG`.

use chrono::{Duration, Utc};
use dogwalk_core::environment::SystemClock;
use dogwalk_core::types::{DogSize, NewWalkRating, NewWalkRequest, UserRole};
use dogwalk_core::{EngineError, LifecycleEngine};
use dogwalk_postgres::{PostgresConfig, PostgresRecordStore};
use dogwalk_runtime::metrics::EngineMetrics;
use dogwalk_runtime::retry::{RetryPolicy, retry_unavailable};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dogwalk=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = EngineMetrics::install()?;

    let config = PostgresConfig::from_env();
    tracing::info!(isolation = %config.isolation_level, "Connecting to PostgreSQL");
    let store = PostgresRecordStore::connect(&config).await?;
    store.migrate().await?;

    // Unique names so the demo can run repeatedly against the same database.
    let run = Utc::now().timestamp_millis();
    let owner = store
        .insert_user(
            &format!("owner-{run}"),
            &format!("owner-{run}@example.com"),
            UserRole::Owner,
        )
        .await?;
    let dog = store.insert_dog(owner, "Bella", DogSize::Small).await?;
    let walker_a = store
        .insert_user(
            &format!("walker-a-{run}"),
            &format!("walker-a-{run}@example.com"),
            UserRole::Walker,
        )
        .await?;
    let walker_b = store
        .insert_user(
            &format!("walker-b-{run}"),
            &format!("walker-b-{run}@example.com"),
            UserRole::Walker,
        )
        .await?;

    let engine = LifecycleEngine::new(store.clone(), Arc::new(SystemClock));
    let policy = RetryPolicy::default();

    let new_request = NewWalkRequest {
        dog_id: dog,
        requested_time: Utc::now() + Duration::days(1),
        duration_minutes: 45,
        location: "Botanic Park".to_string(),
    };
    let request_id =
        retry_unavailable(policy.clone(), || engine.create_request(new_request.clone())).await?;
    tracing::info!(%request_id, "Request posted");

    let application_a = retry_unavailable(policy.clone(), || {
        engine.submit_application(request_id, walker_a)
    })
    .await?;

    match engine.submit_application(request_id, walker_b).await {
        Err(EngineError::Conflict(reason)) => {
            tracing::info!(%reason, "Walker B turned away while A is pending");
        }
        other => anyhow::bail!("walker B should have been turned away, got {other:?}"),
    }

    let status = retry_unavailable(policy.clone(), || {
        engine.reject_application(request_id, application_a)
    })
    .await?;
    tracing::info!(%status, "Walker A rejected");

    let application_b = retry_unavailable(policy.clone(), || {
        engine.submit_application(request_id, walker_b)
    })
    .await?;
    retry_unavailable(policy.clone(), || {
        engine.accept_application(request_id, application_b)
    })
    .await?;
    retry_unavailable(policy.clone(), || engine.complete_request(request_id)).await?;

    let rating = NewWalkRating {
        request_id,
        score: 5,
        comments: Some("Bella loved it".to_string()),
    };
    let rating_id = retry_unavailable(policy, || engine.rate_walk(rating.clone())).await?;

    for application in store.applications_for(request_id).await? {
        tracing::info!(
            application_id = %application.id,
            walker_id = %application.walker_id,
            status = %application.status,
            "Final application state"
        );
    }
    tracing::info!(%rating_id, "Walk rated");

    println!("{}", metrics.render());
    Ok(())
}
