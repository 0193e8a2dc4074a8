// Dispatch message and delivery types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Job, JobId};

/// What travels through the queue. The job row stays the source of truth;
/// the question rides along so a worker does not need a read to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: JobId,
    pub question: String,
    pub enqueued_at: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl DispatchMessage {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id,
            question: job.question.clone(),
            enqueued_at: Utc::now(),
            attempt: 1,
        }
    }
}

/// Receipt for one delivery. Acknowledging with a stale receipt is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle(pub String);

impl AckHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AckHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: DispatchMessage,
    pub handle: AckHandle,
}
