//! Job queue
//!
//! Dispatch is at-least-once. A dequeued message stays invisible until it is
//! acked, nacked, dead-lettered, or its visibility timeout runs out, at which
//! point it is redelivered with `attempt + 1`. Duplicate deliveries are
//! harmless because the orchestrator claims jobs with a compare-and-swap.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::AppResult;

pub mod jobs;
pub mod memory;
pub mod orchestrator;
pub mod redis_queue;
pub mod workers;

pub use jobs::*;
pub use memory::InMemoryDispatcher;
pub use orchestrator::{JobOrchestrator, Outcome};
pub use redis_queue::RedisDispatcher;
pub use workers::{Worker, WorkerPool};

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, message: DispatchMessage) -> AppResult<()>;

    /// Wait up to `timeout` for a message. `None` when nothing arrived.
    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Delivery>>;

    async fn ack(&self, handle: &AckHandle) -> AppResult<()>;

    /// Return the message to the queue once `delay` has passed.
    async fn nack(&self, handle: &AckHandle, delay: Duration) -> AppResult<()>;

    /// Park the message for operators instead of redelivering it.
    async fn dead_letter(&self, handle: &AckHandle, reason: &str) -> AppResult<()>;

    /// Messages ready for delivery.
    async fn depth(&self) -> AppResult<u64>;

    async fn health_check(&self) -> AppResult<()>;
}
