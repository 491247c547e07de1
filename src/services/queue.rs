use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Delivery, DeliveryToken, Job};

/// Source of classification jobs with at-least-once delivery.
#[async_trait]
pub trait JobChannel: Send + Sync {
    /// Take up to `max` visible jobs. Returns an empty batch when idle.
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Permanently remove one delivery. Stale or consumed tokens are a no-op.
    async fn acknowledge(&self, token: &DeliveryToken) -> Result<(), QueueError>;

    /// Number of jobs waiting to be received, including deliveries whose
    /// visibility timeout has lapsed.
    async fn approximate_depth(&self) -> Result<u64, QueueError>;
}

/// Downstream destination for completed jobs.
#[async_trait]
pub trait ResponseChannel: Send + Sync {
    async fn send(&self, job: &Job) -> Result<(), QueueError>;
}

/// Lua prelude shared by the scripts below: moves in-flight deliveries whose
/// deadline (KEYS[3]) is at or before ARGV[1] back onto the pending list.
macro_rules! requeue_expired_lua {
    () => {
        r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, token in ipairs(expired) do
  local body = redis.call('HGET', KEYS[2], token)
  redis.call('ZREM', KEYS[3], token)
  redis.call('HDEL', KEYS[2], token)
  if body then
    redis.call('RPUSH', KEYS[1], body)
  end
end
"#
    };
}

/// Requeues expired deliveries, then hands out up to ARGV[3] bodies under
/// the tokens in ARGV[4..].
const RECEIVE_SCRIPT: &str = concat!(
    requeue_expired_lua!(),
    r#"
local out = {}
for i = 1, tonumber(ARGV[3]) do
  local body = redis.call('RPOP', KEYS[1])
  if not body then
    break
  end
  local token = ARGV[3 + i]
  redis.call('HSET', KEYS[2], token, body)
  redis.call('ZADD', KEYS[3], tonumber(ARGV[1]) + tonumber(ARGV[2]), token)
  table.insert(out, token)
  table.insert(out, body)
end
return out
"#
);

/// Requeues expired deliveries, then reports the pending length.
const DEPTH_SCRIPT: &str = concat!(
    requeue_expired_lua!(),
    r#"
return redis.call('LLEN', KEYS[1])
"#
);

/// Redis-backed queue with visibility timeouts.
///
/// Producers `LPUSH` onto `<name>:pending`. A received body is parked in
/// `<name>:inflight` under a fresh token until it is acknowledged or its
/// deadline in `<name>:deadlines` passes. Expired bodies are moved back to
/// the pending list, next in line to be received, by any receive or depth
/// read, so a lapsed delivery counts as demand even with no worker polling.
pub struct RedisChannel {
    client: redis::Client,
    pending_key: String,
    inflight_key: String,
    deadlines_key: String,
    visibility_timeout: Duration,
}

impl RedisChannel {
    pub fn new(redis_url: &str, name: &str, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            pending_key: format!("{name}:pending"),
            inflight_key: format!("{name}:inflight"),
            deadlines_key: format!("{name}:deadlines"),
            visibility_timeout,
        })
    }

    /// Publish a job to this queue.
    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.pending_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of received but unacknowledged deliveries.
    pub async fn in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let count: u64 = conn.zcard(&self.deadlines_key).await.map_err(QueueError::Redis)?;
        Ok(count)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl JobChannel for RedisChannel {
    async fn receive(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let tokens: Vec<String> = (0..max).map(|_| Uuid::new_v4().to_string()).collect();
        let now_ms = chrono::Utc::now().timestamp_millis();

        let flat: Vec<String> = redis::Script::new(RECEIVE_SCRIPT)
            .key(&self.pending_key)
            .key(&self.inflight_key)
            .key(&self.deadlines_key)
            .arg(now_ms)
            .arg(self.visibility_timeout.as_millis() as u64)
            .arg(max)
            .arg(&tokens)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        if flat.len() % 2 != 0 {
            return Err(QueueError::Protocol(format!(
                "receive script returned {} items, expected token/body pairs",
                flat.len()
            )));
        }

        let deliveries = flat
            .chunks_exact(2)
            .map(|pair| Delivery {
                token: DeliveryToken(pair[0].clone()),
                body: pair[1].clone(),
            })
            .collect();
        Ok(deliveries)
    }

    async fn acknowledge(&self, token: &DeliveryToken) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::pipe()
            .atomic()
            .hdel(&self.inflight_key, &token.0)
            .zrem(&self.deadlines_key, &token.0)
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = redis::Script::new(DEPTH_SCRIPT)
            .key(&self.pending_key)
            .key(&self.inflight_key)
            .key(&self.deadlines_key)
            .arg(chrono::Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl ResponseChannel for RedisChannel {
    async fn send(&self, job: &Job) -> Result<(), QueueError> {
        self.enqueue(job).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unexpected queue reply: {0}")]
    Protocol(String),
}
