//! In-process task dispatcher with the same delivery semantics as the Redis
//! one. Used by tests and by `standalone --in-memory`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AckHandle, Delivery, DispatchMessage, TaskDispatcher};
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: DispatchMessage,
    pub reason: String,
}

struct InFlight {
    message: DispatchMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<DispatchMessage>,
    in_flight: HashMap<AckHandle, InFlight>,
    dead_letters: Vec<DeadLetter>,
}

impl QueueState {
    /// Move expired in-flight messages back to the ready queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<AckHandle> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(entry) = self.in_flight.remove(&handle) {
                let mut message = entry.message;
                message.attempt += 1;
                debug!(job_id = %message.job_id, attempt = message.attempt, "Visibility expired, redelivering");
                self.ready.push_back(message);
            }
        }
    }

    fn next_visibility(&self) -> Option<Instant> {
        self.in_flight.values().map(|entry| entry.visible_at).min()
    }
}

pub struct InMemoryDispatcher {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
    unavailable: AtomicBool,
}

impl InMemoryDispatcher {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::QueueUnavailable(
                "in-memory queue marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl TaskDispatcher for InMemoryDispatcher {
    async fn enqueue(&self, message: DispatchMessage) -> AppResult<()> {
        self.ensure_available()?;
        self.state.lock().await.ready.push_back(message);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Delivery>> {
        self.ensure_available()?;
        let deadline = Instant::now() + timeout;

        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.reclaim_expired(now);

                if let Some(message) = state.ready.pop_front() {
                    let handle = AckHandle::new();
                    state.in_flight.insert(
                        handle.clone(),
                        InFlight {
                            message: message.clone(),
                            visible_at: now + self.visibility_timeout,
                        },
                    );
                    return Ok(Some(Delivery { message, handle }));
                }

                if now >= deadline {
                    return Ok(None);
                }

                state
                    .next_visibility()
                    .map_or(deadline, |visible_at| visible_at.min(deadline))
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> AppResult<()> {
        self.ensure_available()?;
        if self.state.lock().await.in_flight.remove(handle).is_none() {
            debug!(receipt = %handle, "Ack for a receipt that is no longer in flight");
        }
        Ok(())
    }

    async fn nack(&self, handle: &AckHandle, delay: Duration) -> AppResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(entry) = state.in_flight.get_mut(handle) {
            entry.visible_at = Instant::now() + delay;
        }
        drop(state);
        // Wake a waiting consumer so it re-arms its timer for the new deadline.
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, handle: &AckHandle, reason: &str) -> AppResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(entry) = state.in_flight.remove(handle) {
            warn!(job_id = %entry.message.job_id, reason, "Message dead-lettered");
            state.dead_letters.push(DeadLetter {
                message: entry.message,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn depth(&self) -> AppResult<u64> {
        self.ensure_available()?;
        Ok(self.state.lock().await.ready.len() as u64)
    }

    async fn health_check(&self) -> AppResult<()> {
        self.ensure_available()
    }
}
