//! Redis-backed task dispatcher with visibility timeouts.
//!
//! ## Keys
//!
//! - `{queue}`: ready list (RPUSH to enqueue, LPOP to deliver)
//! - `{queue}:inflight`: sorted set of receipts scored by visibility deadline (ms)
//! - `{queue}:payloads`: hash of receipt → payload for in-flight messages
//! - `{queue}:dlq`: dead-letter list
//!
//! Each multi-key change runs as one Lua script, so a crash between steps
//! cannot lose or duplicate a message. Expired in-flight messages are moved
//! back to the ready list, with `attempt + 1`, at the start of every dequeue.
//! Enqueue is only as durable as the Redis persistence settings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use super::{AckHandle, Delivery, DispatchMessage, TaskDispatcher};
use crate::types::{AppError, AppResult};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const DEQUEUE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
    local payload = redis.call('HGET', KEYS[3], receipt)
    redis.call('ZREM', KEYS[2], receipt)
    redis.call('HDEL', KEYS[3], receipt)
    if payload then
        local ok, message = pcall(cjson.decode, payload)
        if ok then
            message['attempt'] = (tonumber(message['attempt']) or 1) + 1
            payload = cjson.encode(message)
        end
        redis.call('RPUSH', KEYS[1], payload)
    end
end
local payload = redis.call('LPOP', KEYS[1])
if not payload then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[3], ARGV[3], payload)
return payload
"#;

const ACK_SCRIPT: &str = r#"
redis.call('HDEL', KEYS[2], ARGV[1])
return redis.call('ZREM', KEYS[1], ARGV[1])
"#;

const DEAD_LETTER_SCRIPT: &str = r#"
local payload = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
if not payload then
    return 0
end
redis.call('RPUSH', KEYS[3], cjson.encode({
    payload = payload,
    reason = ARGV[2],
    dead_lettered_at = ARGV[3]
}))
return 1
"#;

pub struct RedisDispatcher {
    conn: ConnectionManager,
    keys: QueueKeys,
    visibility_timeout: Duration,
    poll_interval: Duration,
    dequeue_script: Script,
    ack_script: Script,
    dead_letter_script: Script,
}

#[derive(Debug, Clone, PartialEq)]
struct QueueKeys {
    ready: String,
    inflight: String,
    payloads: String,
    dlq: String,
}

impl QueueKeys {
    fn new(queue_name: &str) -> Self {
        Self {
            ready: queue_name.to_string(),
            inflight: format!("{}:inflight", queue_name),
            payloads: format!("{}:payloads", queue_name),
            dlq: format!("{}:dlq", queue_name),
        }
    }
}

impl RedisDispatcher {
    pub async fn connect(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            keys: QueueKeys::new(queue_name),
            visibility_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            dead_letter_script: Script::new(DEAD_LETTER_SCRIPT),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn try_dequeue(&self) -> AppResult<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let handle = AckHandle::new();
        let now_ms = Utc::now().timestamp_millis();
        let visible_at = now_ms + self.visibility_timeout.as_millis() as i64;

        let payload: Option<String> = self
            .dequeue_script
            .key(&self.keys.ready)
            .key(&self.keys.inflight)
            .key(&self.keys.payloads)
            .arg(now_ms)
            .arg(visible_at)
            .arg(&handle.0)
            .invoke_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<DispatchMessage>(&payload) {
            Ok(message) => {
                debug!(job_id = %message.job_id, attempt = message.attempt, receipt = %handle, "Message delivered");
                Ok(Some(Delivery { message, handle }))
            }
            Err(e) => {
                warn!(error = %e, receipt = %handle, "Undecodable payload, moving to dead-letter list");
                self.dead_letter(&handle, &format!("undecodable payload: {}", e))
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TaskDispatcher for RedisDispatcher {
    #[instrument(skip(self, message), fields(job_id = %message.job_id, queue = %self.keys.ready))]
    async fn enqueue(&self, message: DispatchMessage) -> AppResult<()> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| AppError::Internal(format!("Failed to serialize dispatch message: {}", e)))?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.keys.ready)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!("Message enqueued");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> AppResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(delivery) = self.try_dequeue().await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, handle: &AckHandle) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .ack_script
            .key(&self.keys.inflight)
            .key(&self.keys.payloads)
            .arg(&handle.0)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            debug!(receipt = %handle, "Ack for a receipt that is no longer in flight");
        }
        Ok(())
    }

    async fn nack(&self, handle: &AckHandle, delay: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let visible_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        // XX: only reschedule receipts that are still in flight.
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.keys.inflight)
            .arg("XX")
            .arg(visible_at)
            .arg(&handle.0)
            .query_async(&mut conn)
            .await?;

        debug!(receipt = %handle, ?delay, "Message nacked");
        Ok(())
    }

    async fn dead_letter(&self, handle: &AckHandle, reason: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .dead_letter_script
            .key(&self.keys.inflight)
            .key(&self.keys.payloads)
            .key(&self.keys.dlq)
            .arg(&handle.0)
            .arg(reason)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if moved == 1 {
            warn!(receipt = %handle, reason, "Message dead-lettered");
        }
        Ok(())
    }

    async fn depth(&self) -> AppResult<u64> {
        let mut conn = self.conn.clone();
        let depth: u64 = redis::cmd("LLEN")
            .arg(&self.keys.ready)
            .query_async(&mut conn)
            .await?;
        Ok(depth)
    }

    async fn health_check(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
