use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::JobStore;
use crate::models::{normalize_question, Citation, Job, JobId, JobStatus, JobUpdate};
use crate::types::{AppError, AppResult};

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

// Note: FromRow is needed for runtime query_as (without DATABASE_URL at compile time)
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    question: String,
    status: String,
    result_text: Option<String>,
    sources_metadata: Option<Json<Vec<Citation>>>,
    error_message: Option<String>,
    processing_time_seconds: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId(row.id),
            question: row.question,
            status: row.status.parse()?,
            answer: row.result_text,
            citations: row.sources_metadata.map(|Json(citations)| citations),
            error: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processing_time_seconds: row.processing_time_seconds,
        })
    }
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, question), fields(question_len = question.len()))]
    async fn create(&self, question: &str) -> AppResult<Job> {
        let question = normalize_question(question)?;
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, question, status)
            VALUES ($1, $2, $3)
            RETURNING id, question, status, result_text, sources_metadata,
                      error_message, processing_time_seconds, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&question)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        let job = Job::try_from(row)?;
        debug!(job_id = %job.id, "Job row inserted");
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> AppResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, question, status, result_text, sources_metadata,
                   error_message, processing_time_seconds, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(AppError::NotFound(format!("job {}", job_id))),
        }
    }

    #[instrument(skip(self, update), fields(job_id = %job_id, expected = %expected, target = %update.target_status()))]
    async fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> AppResult<Job> {
        let target = update.target_status();
        if !expected.can_transition_to(target) {
            return Err(AppError::InvalidTransition {
                from: expected.to_string(),
                to: target.to_string(),
            });
        }

        let (answer, citations, error, duration) = match update {
            JobUpdate::Processing => (None, None, None, None),
            JobUpdate::Completed {
                answer,
                citations,
                processing_time_seconds,
            } => (Some(answer), Some(Json(citations)), None, Some(processing_time_seconds)),
            JobUpdate::Failed {
                error,
                processing_time_seconds,
            } => (None, None, Some(error), processing_time_seconds),
        };

        // The status predicate makes this a compare-and-swap.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = $3,
                result_text = $4,
                sources_metadata = $5,
                error_message = $6,
                processing_time_seconds = $7,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, question, status, result_text, sources_metadata,
                      error_message, processing_time_seconds, created_at, updated_at
            "#,
        )
        .bind(job_id.0)
        .bind(expected.as_str())
        .bind(target.as_str())
        .bind(answer)
        .bind(citations)
        .bind(error)
        .bind(duration)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Job::try_from(row);
        }

        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match actual {
            Some(actual) => Err(AppError::StaleTransition {
                job_id: job_id.to_string(),
                expected: expected.to_string(),
                actual,
            }),
            None => Err(AppError::NotFound(format!("job {}", job_id))),
        }
    }

    async fn health_check(&self) -> AppResult<()> {
        super::pool::health_check(&self.pool).await
    }
}
