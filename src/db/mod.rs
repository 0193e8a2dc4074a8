use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{Job, JobId, JobStatus, JobUpdate};
use crate::types::AppResult;
use crate::utils::retry::with_retry;

pub use chunks::*;
pub use memory::*;
pub use operations::*;
pub use pool::*;

pub mod chunks;
pub mod memory;
pub mod operations;
pub mod pool;

/// Durable job lifecycle storage.
///
/// `transition` is the only mutation path after creation. It is a
/// compare-and-swap on the status column: of any number of concurrent callers
/// expecting the same status, exactly one wins and the rest observe
/// `AppError::StaleTransition`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, question: &str) -> AppResult<Job>;

    async fn get(&self, job_id: JobId) -> AppResult<Job>;

    async fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job>;

    async fn health_check(&self) -> AppResult<()>;
}

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config.url.clone();
    let max_connections = config.max_connections;
    let min_connections = config.min_connections;

    let pool = with_retry(
        move || {
            let url = url.clone();
            async move {
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(min_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&url)
                    .await
            }
            .boxed()
        },
        config.connect_attempts.max(1),
    )
    .await?;

    // Test connection
    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await?;

    info!(max_connections, "Database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");
    Ok(())
}
