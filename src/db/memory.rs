use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::JobStore;
use crate::models::{normalize_question, Job, JobId, JobStatus, JobUpdate};
use crate::types::{AppError, AppResult};

/// Process-local job store for tests and single-process development runs.
///
/// `set_available(false)` makes every call fail with `StorageUnavailable`.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StorageUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Snapshot of every stored job, oldest first.
    #[cfg(test)]
    pub(crate) async fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, question: &str) -> AppResult<Job> {
        let question = normalize_question(question)?;
        self.ensure_available()?;
        let job = Job::new(question);
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> AppResult<Job> {
        self.ensure_available()?;
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

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
        self.ensure_available()?;

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        if job.status != expected {
            return Err(AppError::StaleTransition {
                job_id: job_id.to_string(),
                expected: expected.to_string(),
                actual: job.status.to_string(),
            });
        }

        job.apply(update);
        Ok(job.clone())
    }

    async fn health_check(&self) -> AppResult<()> {
        self.ensure_available()
    }
}
