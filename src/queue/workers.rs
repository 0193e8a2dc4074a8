// Worker loop and pool: dequeue → orchestrate → ack / nack / dead-letter

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use super::orchestrator::EXHAUSTED_ERROR;
use super::{Delivery, JobOrchestrator, Outcome, TaskDispatcher};

const DEQUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Worker {
    id: String,
    dispatcher: Arc<dyn TaskDispatcher>,
    orchestrator: Arc<JobOrchestrator>,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        dispatcher: Arc<dyn TaskDispatcher>,
        orchestrator: Arc<JobOrchestrator>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            dispatcher,
            orchestrator,
            poll_timeout,
        }
    }

    /// Poll until `shutdown` flips to true. A dequeue in progress is allowed
    /// to finish so a message already taken off the queue is always handled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, "Worker started");

        while !*shutdown.borrow() {
            match self.dispatcher.dequeue(self.poll_timeout).await {
                Ok(Some(delivery)) => {
                    self.handle(delivery).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "Dequeue failed, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(DEQUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(worker = %self.id, "Worker stopped");
    }

    pub async fn handle(&self, delivery: Delivery) -> Outcome {
        let span = info_span!(
            "job",
            job_id = %delivery.message.job_id,
            attempt = delivery.message.attempt,
            worker = %self.id
        );

        async {
            let outcome = self.orchestrator.process(&delivery.message).await;
            self.settle(&delivery, outcome).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn settle(&self, delivery: &Delivery, outcome: Outcome) {
        let handle = &delivery.handle;
        let result = match outcome {
            Outcome::Completed
            | Outcome::Failed
            | Outcome::Skipped
            | Outcome::Exhausted { job_failed: true } => self.dispatcher.ack(handle).await,
            Outcome::Retry => {
                let delay = self
                    .orchestrator
                    .retry_policy()
                    .backoff(delivery.message.attempt);
                info!(?delay, "Message will be redelivered");
                self.dispatcher.nack(handle, delay).await
            }
            Outcome::Exhausted { job_failed: false } => {
                let reason = format!("{}; job could not be marked failed", EXHAUSTED_ERROR);
                self.dispatcher.dead_letter(handle, &reason).await
            }
        };

        // Unsettled messages come back once their visibility timeout expires.
        if let Err(e) = result {
            warn!(error = %e, ?outcome, "Could not settle message");
        }
    }
}

/// Worker id: `<hostname>-<pid>-<index>`.
pub fn worker_id(index: usize) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string());
    format!("{}-{}-{}", host, std::process::id(), index)
}

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        concurrency: usize,
        dispatcher: Arc<dyn TaskDispatcher>,
        orchestrator: Arc<JobOrchestrator>,
        poll_timeout: Duration,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let concurrency = concurrency.max(1);

        let handles = (0..concurrency)
            .map(|index| {
                let worker = Worker::new(
                    worker_id(index),
                    dispatcher.clone(),
                    orchestrator.clone(),
                    poll_timeout,
                );
                tokio::spawn(worker.run(receiver.clone()))
            })
            .collect();

        info!(concurrency, "Worker pool started");
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop dequeuing and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{pipeline, StubLLM};
    use crate::db::{InMemoryJobStore, JobStore};
    use crate::models::{JobId, JobStatus, JobUpdate};
    use crate::queue::{DispatchMessage, InMemoryDispatcher};
    use crate::utils::retry::RetryPolicy;

    struct Setup {
        store: Arc<InMemoryJobStore>,
        queue: Arc<InMemoryDispatcher>,
        llm: Arc<StubLLM>,
        orchestrator: Arc<JobOrchestrator>,
    }

    fn setup(llm: StubLLM, visibility: Duration) -> Setup {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryDispatcher::new(visibility));
        let llm = Arc::new(llm);
        let (retriever, generator) = pipeline(llm.clone());
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        let orchestrator = Arc::new(JobOrchestrator::new(store.clone(), retriever, generator, policy));
        Setup {
            store,
            queue,
            llm,
            orchestrator,
        }
    }

    async fn wait_for_terminal(store: &InMemoryJobStore, job_id: JobId) -> JobStatus {
        for _ in 0..200 {
            let status = store.get(job_id).await.unwrap().status;
            if status.is_terminal() {
                return status;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_pool_processes_submitted_job() {
        let s = setup(StubLLM::answering("answer"), Duration::from_secs(30));
        let job = s.store.create("What is c2?").await.unwrap();
        s.queue.enqueue(DispatchMessage::new(&job)).await.unwrap();

        let pool = WorkerPool::spawn(2, s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));
        assert_eq!(pool.len(), 2);

        assert_eq!(wait_for_terminal(&s.store, job.id).await, JobStatus::Completed);
        pool.shutdown().await;

        assert_eq!(s.queue.in_flight().await, 0);
        assert_eq!(s.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_messages_are_acked_after_one_run() {
        let s = setup(StubLLM::answering("answer"), Duration::from_secs(30));
        let job = s.store.create("What is c2?").await.unwrap();
        let message = DispatchMessage::new(&job);
        s.queue.enqueue(message.clone()).await.unwrap();
        s.queue.enqueue(message).await.unwrap();

        let pool = WorkerPool::spawn(2, s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));
        assert_eq!(wait_for_terminal(&s.store, job.id).await, JobStatus::Completed);

        for _ in 0..100 {
            if s.queue.depth().await.unwrap() == 0 && s.queue.in_flight().await == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        assert_eq!(s.llm.calls(), 1);
        assert_eq!(s.queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_retry_outcome_nacks_for_redelivery() {
        let s = setup(StubLLM::answering("answer"), Duration::from_secs(30));
        let job = s.store.create("What is c2?").await.unwrap();
        s.queue.enqueue(DispatchMessage::new(&job)).await.unwrap();

        let worker = Worker::new("test", s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));
        let delivery = s.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        s.store.set_available(false);
        assert_eq!(worker.handle(delivery).await, Outcome::Retry);
        s.store.set_available(true);

        let redelivered = s.queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(redelivered.message.attempt, 2);
        assert_eq!(worker.handle(redelivered).await, Outcome::Completed);
        assert_eq!(s.store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    /// Handle every delivery until the queue stays empty, returning
    /// `(attempt, outcome)` pairs.
    async fn drain(worker: &Worker, queue: &InMemoryDispatcher) -> Vec<(u32, Outcome)> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = queue.dequeue(Duration::from_millis(500)).await.unwrap() {
            let attempt = delivery.message.attempt;
            outcomes.push((attempt, worker.handle(delivery).await));
        }
        outcomes
    }

    #[tokio::test]
    async fn test_lost_result_write_ends_in_failed_job() {
        let s = setup(
            StubLLM::answering("answer").with_delay(Duration::from_millis(100)),
            Duration::from_secs(30),
        );
        let job = s.store.create("What is c2?").await.unwrap();
        s.queue.enqueue(DispatchMessage::new(&job)).await.unwrap();

        let worker = Arc::new(Worker::new("test", s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20)));
        let delivery = s.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.handle(delivery).await })
        };
        sleep(Duration::from_millis(30)).await;
        assert_eq!(s.store.get(job.id).await.unwrap().status, JobStatus::Processing);
        s.store.set_available(false);
        assert_eq!(running.await.unwrap(), Outcome::Retry);
        s.store.set_available(true);

        let outcomes = drain(&worker, &s.queue).await;
        assert_eq!(
            outcomes,
            vec![
                (2, Outcome::Retry),
                (3, Outcome::Retry),
                (4, Outcome::Exhausted { job_failed: true }),
            ]
        );

        let job = s.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(EXHAUSTED_ERROR));
        assert_eq!(s.llm.calls(), 1);
        assert_eq!(s.queue.depth().await.unwrap(), 0);
        assert_eq!(s.queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_crash_after_claim_ends_in_failed_job() {
        let s = setup(StubLLM::answering("answer"), Duration::from_millis(30));
        let job = s.store.create("What is c2?").await.unwrap();
        s.queue.enqueue(DispatchMessage::new(&job)).await.unwrap();

        // A worker takes the message, claims the job and dies without settling.
        let abandoned = s.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        s.store
            .transition(abandoned.message.job_id, JobStatus::Pending, JobUpdate::Processing)
            .await
            .unwrap();
        drop(abandoned);

        let worker = Worker::new("test", s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));
        let outcomes = drain(&worker, &s.queue).await;
        assert_eq!(
            outcomes,
            vec![
                (2, Outcome::Retry),
                (3, Outcome::Retry),
                (4, Outcome::Exhausted { job_failed: true }),
            ]
        );

        let job = s.store.get(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.answer.is_none());
        assert_eq!(s.llm.calls(), 0);
        assert_eq!(s.queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_exhausted_message_with_storage_down_is_dead_lettered() {
        let s = setup(StubLLM::answering("answer"), Duration::from_secs(30));
        let job = s.store.create("What is c2?").await.unwrap();
        let message = DispatchMessage { attempt: 4, ..DispatchMessage::new(&job) };
        s.queue.enqueue(message).await.unwrap();

        let worker = Worker::new("test", s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));
        let delivery = s.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        s.store.set_available(false);
        assert_eq!(
            worker.handle(delivery).await,
            Outcome::Exhausted { job_failed: false }
        );

        let parked = s.queue.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].message.job_id, job.id);
        assert_eq!(s.queue.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let s = setup(StubLLM::answering("answer"), Duration::from_secs(30));
        let pool = WorkerPool::spawn(3, s.queue.clone(), s.orchestrator.clone(), Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
            .await
            .expect("pool should stop promptly");
    }

    #[test]
    fn test_worker_id_carries_index() {
        assert!(worker_id(7).ends_with("-7"));
    }
}
