//! Job Orchestrator
//!
//! Drives one dispatch message through the job state machine:
//!
//! ```text
//! PENDING ──claim (CAS)──▶ PROCESSING ──▶ COMPLETED
//!                                    └──▶ FAILED
//! ```
//!
//! The claim is a compare-and-swap, so when a message is delivered twice only
//! one delivery does any work. The returned [`Outcome`] tells the worker what
//! to do with the message.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::DispatchMessage;
use crate::agents::{AnswerGenerator, GeneratedAnswer, HybridRetriever};
use crate::db::JobStore;
use crate::models::{JobStatus, JobUpdate};
use crate::types::{AppError, AppResult};
use crate::utils::retry::RetryPolicy;

pub const EXHAUSTED_ERROR: &str = "exceeded maximum delivery attempts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Job reached COMPLETED. Ack.
    Completed,
    /// Job reached FAILED. Ack.
    Failed,
    /// Duplicate, orphaned or already-resolved message. Ack without work.
    Skipped,
    /// Storage was unavailable. Nack so the dispatcher redelivers.
    Retry,
    /// Attempt budget spent. `job_failed` says whether the job could be
    /// forced to FAILED: ack if so, dead-letter otherwise.
    Exhausted { job_failed: bool },
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    retriever: Arc<HybridRetriever>,
    generator: Arc<AnswerGenerator>,
    retry_policy: RetryPolicy,
    top_k: usize,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        retriever: Arc<HybridRetriever>,
        generator: Arc<AnswerGenerator>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let top_k = retriever.default_top_k();
        Self {
            store,
            retriever,
            generator,
            retry_policy,
            top_k,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub async fn process(&self, message: &DispatchMessage) -> Outcome {
        if self.retry_policy.is_exhausted(message.attempt) {
            return self.exhaust(message).await;
        }

        let job_id = message.job_id;
        let started = Instant::now();

        match self
            .store
            .transition(job_id, JobStatus::Pending, JobUpdate::Processing)
            .await
        {
            Ok(_) => info!("Job claimed"),
            Err(AppError::StaleTransition { actual, .. }) => {
                // A redelivery that finds the job still PROCESSING means an
                // earlier attempt crashed or could not record its result. Keep
                // the message cycling so exhaustion forces the job to FAILED.
                if message.attempt > 1 && actual == JobStatus::Processing.as_str() {
                    warn!(status = %actual, "Job left unresolved by an earlier attempt, holding message");
                    return Outcome::Retry;
                }
                info!(status = %actual, "Job already claimed, discarding duplicate delivery");
                return Outcome::Skipped;
            }
            Err(AppError::NotFound(_)) => {
                warn!("Dispatch message refers to an unknown job, discarding");
                return Outcome::Skipped;
            }
            Err(e) => {
                warn!(error = %e, "Could not claim job, leaving message for redelivery");
                return Outcome::Retry;
            }
        }

        let result = self.answer(&message.question).await;
        let elapsed = started.elapsed().as_secs_f64();

        let (update, outcome) = match result {
            Ok(GeneratedAnswer { answer, citations }) => (
                JobUpdate::Completed {
                    answer,
                    citations,
                    processing_time_seconds: elapsed,
                },
                Outcome::Completed,
            ),
            Err(e) => {
                warn!(error = %e, "Job failed");
                (JobUpdate::failed(e.to_string(), Some(elapsed)), Outcome::Failed)
            }
        };

        match self
            .store
            .transition(job_id, JobStatus::Processing, update)
            .await
        {
            Ok(job) => {
                info!(
                    status = %job.status,
                    processing_time_seconds = elapsed,
                    "Job finished"
                );
                outcome
            }
            Err(AppError::StaleTransition { actual, .. }) => {
                warn!(status = %actual, "Job was resolved elsewhere while processing");
                Outcome::Skipped
            }
            Err(AppError::NotFound(_)) => {
                warn!("Job disappeared while processing");
                Outcome::Skipped
            }
            Err(e) => {
                // The redelivery holds the message until exhaustion fails the job.
                error!(error = %e, "Could not record job result");
                Outcome::Retry
            }
        }
    }

    async fn answer(&self, question: &str) -> AppResult<GeneratedAnswer> {
        let chunks = self.retriever.retrieve(question, self.top_k).await?;
        self.generator.generate(question, &chunks).await
    }

    /// Force the job to FAILED once the message has used its attempt budget.
    async fn exhaust(&self, message: &DispatchMessage) -> Outcome {
        let job_id = message.job_id;
        warn!(
            max_attempts = self.retry_policy.max_attempts,
            "Delivery attempts exhausted, failing job"
        );

        match self
            .store
            .transition(job_id, JobStatus::Pending, JobUpdate::Processing)
            .await
        {
            Ok(_) | Err(AppError::StaleTransition { .. }) => {}
            Err(AppError::NotFound(_)) => return Outcome::Skipped,
            Err(e) => {
                error!(error = %e, "Could not fail exhausted job");
                return Outcome::Exhausted { job_failed: false };
            }
        }

        match self
            .store
            .transition(job_id, JobStatus::Processing, JobUpdate::failed(EXHAUSTED_ERROR, None))
            .await
        {
            Ok(_) => Outcome::Exhausted { job_failed: true },
            Err(AppError::StaleTransition { .. }) | Err(AppError::NotFound(_)) => Outcome::Skipped,
            Err(e) => {
                error!(error = %e, "Could not fail exhausted job");
                Outcome::Exhausted { job_failed: false }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{pipeline, StubLLM};
    use crate::db::InMemoryJobStore;
    use crate::models::Job;

    struct Harness {
        store: Arc<InMemoryJobStore>,
        llm: Arc<StubLLM>,
        orchestrator: Arc<JobOrchestrator>,
    }

    fn harness(llm: StubLLM) -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let llm = Arc::new(llm);
        let (retriever, generator) = pipeline(llm.clone());
        let orchestrator = Arc::new(JobOrchestrator::new(
            store.clone(),
            retriever,
            generator,
            RetryPolicy::default(),
        ));
        Harness {
            store,
            llm,
            orchestrator,
        }
    }

    async fn submit(store: &InMemoryJobStore) -> (Job, DispatchMessage) {
        let job = store.create("What is c2?").await.unwrap();
        let message = DispatchMessage::new(&job);
        (job, message)
    }

    #[tokio::test]
    async fn test_completes_with_citations_from_retrieval() {
        let h = harness(StubLLM::answering("c2 is a passage [Source: doc-c2, Chunk: c2]."));
        let (job, message) = submit(&h.store).await;

        assert_eq!(h.orchestrator.process(&message).await, Outcome::Completed);

        let job = h.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.answer.unwrap().contains("c2"));
        let citations = job.citations.unwrap();
        assert_eq!(citations[0].chunk_id, "c2");
        assert!(citations.iter().all(|c| c.chunk_id == "c1" || c.chunk_id == "c2"));
        assert!(job.processing_time_seconds.is_some());
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_marks_job_failed() {
        let h = harness(StubLLM::failing());
        let (job, message) = submit(&h.store).await;

        assert_eq!(h.orchestrator.process(&message).await, Outcome::Failed);

        let job = h.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.error.unwrap().is_empty());
        assert!(job.answer.is_none());
        assert!(job.citations.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_does_work_once() {
        let h = harness(StubLLM::answering("answer").with_delay(std::time::Duration::from_millis(50)));
        let (job, message) = submit(&h.store).await;

        let first = {
            let orchestrator = h.orchestrator.clone();
            let message = message.clone();
            tokio::spawn(async move { orchestrator.process(&message).await })
        };
        let second = {
            let orchestrator = h.orchestrator.clone();
            let message = message.clone();
            tokio::spawn(async move { orchestrator.process(&message).await })
        };

        let mut outcomes = vec![first.await.unwrap(), second.await.unwrap()];
        outcomes.sort_by_key(|o| format!("{o:?}"));

        assert_eq!(outcomes, vec![Outcome::Completed, Outcome::Skipped]);
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_redelivery_after_completion_is_skipped() {
        let h = harness(StubLLM::answering("answer"));
        let (_, message) = submit(&h.store).await;

        assert_eq!(h.orchestrator.process(&message).await, Outcome::Completed);
        let redelivered = DispatchMessage { attempt: 2, ..message };
        assert_eq!(h.orchestrator.process(&redelivered).await, Outcome::Skipped);
        assert_eq!(h.llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_of_unresolved_job_is_held() {
        let h = harness(StubLLM::answering("answer"));
        let (job, message) = submit(&h.store).await;
        h.store
            .transition(job.id, JobStatus::Pending, JobUpdate::Processing)
            .await
            .unwrap();

        // Same attempt: a concurrent duplicate, discarded.
        assert_eq!(h.orchestrator.process(&message).await, Outcome::Skipped);

        // Later attempt: the claimant never finished, keep the message alive.
        let redelivered = DispatchMessage { attempt: 2, ..message.clone() };
        assert_eq!(h.orchestrator.process(&redelivered).await, Outcome::Retry);
        assert_eq!(h.llm.calls(), 0);

        let exhausted = DispatchMessage { attempt: 4, ..message };
        assert_eq!(
            h.orchestrator.process(&exhausted).await,
            Outcome::Exhausted { job_failed: true }
        );
        let job = h.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(EXHAUSTED_ERROR));
    }

    #[tokio::test]
    async fn test_unknown_job_is_skipped() {
        let h = harness(StubLLM::answering("answer"));
        let orphan = DispatchMessage::new(&Job::new("never stored"));
        assert_eq!(h.orchestrator.process(&orphan).await, Outcome::Skipped);
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_storage_outage_on_claim_asks_for_retry() {
        let h = harness(StubLLM::answering("answer"));
        let (job, message) = submit(&h.store).await;

        h.store.set_available(false);
        assert_eq!(h.orchestrator.process(&message).await, Outcome::Retry);
        assert_eq!(h.llm.calls(), 0);

        h.store.set_available(true);
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Pending);
        let redelivered = DispatchMessage { attempt: 2, ..message };
        assert_eq!(h.orchestrator.process(&redelivered).await, Outcome::Completed);
    }

    #[tokio::test]
    async fn test_exhausted_pending_job_is_failed() {
        let h = harness(StubLLM::answering("answer"));
        let (job, message) = submit(&h.store).await;

        let exhausted = DispatchMessage { attempt: 4, ..message };
        assert_eq!(
            h.orchestrator.process(&exhausted).await,
            Outcome::Exhausted { job_failed: true }
        );

        let job = h.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(EXHAUSTED_ERROR));
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_with_storage_down_is_dead_lettered() {
        let h = harness(StubLLM::answering("answer"));
        let (_, message) = submit(&h.store).await;

        h.store.set_available(false);
        let exhausted = DispatchMessage { attempt: 4, ..message };
        assert_eq!(
            h.orchestrator.process(&exhausted).await,
            Outcome::Exhausted { job_failed: false }
        );
    }

    #[tokio::test]
    async fn test_exhausted_completed_job_is_left_alone() {
        let h = harness(StubLLM::answering("answer"));
        let (job, message) = submit(&h.store).await;
        assert_eq!(h.orchestrator.process(&message).await, Outcome::Completed);

        let exhausted = DispatchMessage { attempt: 4, ..message };
        assert_eq!(h.orchestrator.process(&exhausted).await, Outcome::Skipped);
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }
}
