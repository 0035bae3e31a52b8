// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_entry::{AckHandle, Delivery, QueueEntry};
use crate::infrastructure::cache::redis_client::RedisClient;
use crate::queue::broker::{QueueBroker, QueueError, QueueStats};
use crate::utils::clock::{to_chrono, until, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 原子出队：先回收超过可见性超时的投递，再按顺序从第一个有就绪条目的队列中认领
///
/// KEYS: 1 in-flight 有序集合, 2 投递哈希, 3 条目哈希, 4 投递计数哈希, 5.. 就绪队列
/// ARGV: 1 当前毫秒, 2 可见性截止毫秒, 3 新句柄
const CLAIM_SCRIPT: &str = r#"
    local now = tonumber(ARGV[1])
    local deadline = tonumber(ARGV[2])
    local handle = ARGV[3]

    local expired = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", now)
    for _, h in ipairs(expired) do
        local v = redis.call("HGET", KEYS[2], h)
        if v then
            local pos = string.find(v, "|[^|]*$")
            redis.call("ZADD", string.sub(v, 1, pos - 1), now, string.sub(v, pos + 1))
            redis.call("HDEL", KEYS[2], h)
        end
        redis.call("ZREM", KEYS[1], h)
    end

    for i = 5, #KEYS do
        local claimed = redis.call("ZRANGEBYSCORE", KEYS[i], "-inf", now, "LIMIT", 0, 1)
        if #claimed > 0 then
            local entry_id = claimed[1]
            local score = redis.call("ZSCORE", KEYS[i], entry_id)
            redis.call("ZREM", KEYS[i], entry_id)
            local payload = redis.call("HGET", KEYS[3], entry_id)
            if payload then
                local attempts = redis.call("HINCRBY", KEYS[4], entry_id, 1)
                redis.call("ZADD", KEYS[1], deadline, handle)
                redis.call("HSET", KEYS[2], handle, KEYS[i] .. "|" .. entry_id)
                return {payload, tostring(attempts), score}
            end
        end
    end
    return {}
"#;

/// KEYS: 1 in-flight, 2 投递哈希, 3 条目哈希, 4 投递计数哈希; ARGV: 1 句柄
const ACK_SCRIPT: &str = r#"
    local v = redis.call("HGET", KEYS[2], ARGV[1])
    redis.call("ZREM", KEYS[1], ARGV[1])
    if not v then
        return 0
    end
    local pos = string.find(v, "|[^|]*$")
    local entry_id = string.sub(v, pos + 1)
    redis.call("HDEL", KEYS[2], ARGV[1])
    redis.call("HDEL", KEYS[3], entry_id)
    redis.call("HDEL", KEYS[4], entry_id)
    return 1
"#;

/// KEYS: 1 in-flight, 2 投递哈希; ARGV: 1 句柄, 2 重新可见毫秒
const NACK_SCRIPT: &str = r#"
    local v = redis.call("HGET", KEYS[2], ARGV[1])
    if not v then
        return 0
    end
    local pos = string.find(v, "|[^|]*$")
    redis.call("ZREM", KEYS[1], ARGV[1])
    redis.call("HDEL", KEYS[2], ARGV[1])
    redis.call("ZADD", string.sub(v, 1, pos - 1), tonumber(ARGV[2]), string.sub(v, pos + 1))
    return 1
"#;

/// Redis 队列代理
///
/// 就绪队列是以可见时间为分数的有序集合；出队的条目进入以截止时间为分数的
/// in-flight 集合，超时未确认则在下一次出队时被回收重投
#[derive(Clone)]
pub struct RedisQueueBroker {
    redis: RedisClient,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    visibility_timeout: Duration,
}

impl RedisQueueBroker {
    /// 创建新的 Redis 队列代理
    ///
    /// # 参数
    ///
    /// * `redis` - Redis 客户端
    /// * `clock` - 时钟
    /// * `key_prefix` - 键前缀
    /// * `visibility_timeout` - 出队后未确认多久重新可见
    pub fn new(
        redis: RedisClient,
        clock: Arc<dyn Clock>,
        key_prefix: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            redis,
            clock,
            key_prefix: key_prefix.into(),
            visibility_timeout,
        }
    }

    fn ready_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.key_prefix, queue)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.key_prefix)
    }

    fn deliveries_key(&self) -> String {
        format!("{}:deliveries", self.key_prefix)
    }

    fn entries_key(&self) -> String {
        format!("{}:entries", self.key_prefix)
    }

    fn attempts_key(&self) -> String {
        format!("{}:attempts", self.key_prefix)
    }
}

fn from_millis(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(fallback)
}

#[async_trait]
impl QueueBroker for RedisQueueBroker {
    async fn enqueue(&self, mut entry: QueueEntry, delay: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        entry.visible_at = now + to_chrono(delay);
        let payload = serde_json::to_string(&entry)?;
        let id = entry.id.to_string();

        let mut conn = self.redis.get_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.entries_key(), &id, payload)
            .ignore()
            .zadd(
                self.ready_key(&entry.queue),
                &id,
                entry.visible_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        let deadline = now + to_chrono(self.visibility_timeout);
        let handle = AckHandle::new();

        let claim = redis::Script::new(CLAIM_SCRIPT);
        let mut script = claim.prepare_invoke();
        script
            .key(self.inflight_key())
            .key(self.deliveries_key())
            .key(self.entries_key())
            .key(self.attempts_key());
        for queue in queues {
            script.key(self.ready_key(queue));
        }
        script
            .arg(now.timestamp_millis())
            .arg(deadline.timestamp_millis())
            .arg(handle.as_str());

        let mut conn = self.redis.get_connection().await?;
        let reply: Vec<String> = script.invoke_async(&mut conn).await?;

        let [payload, attempts, score] = match <[String; 3]>::try_from(reply) {
            Ok(parts) => parts,
            Err(_) => return Ok(None),
        };

        let mut entry: QueueEntry = serde_json::from_str(&payload)?;
        entry.delivery_attempts = attempts.parse().unwrap_or(1);
        if let Ok(score) = score.parse::<f64>() {
            entry.visible_at = from_millis(score as i64, entry.visible_at);
        }

        debug!(task_id = %entry.task_id, queue = %entry.queue, "Claimed queue entry");
        Ok(Some(Delivery { entry, handle }))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let mut conn = self.redis.get_connection().await?;
        let result: i64 = redis::Script::new(ACK_SCRIPT)
            .key(self.inflight_key())
            .key(self.deliveries_key())
            .key(self.entries_key())
            .key(self.attempts_key())
            .arg(handle.as_str())
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            Ok(())
        } else {
            Err(QueueError::UnknownHandle(handle.clone()))
        }
    }

    async fn nack(&self, handle: &AckHandle, requeue_delay: Duration) -> Result<(), QueueError> {
        let visible_at = self.clock.now() + to_chrono(requeue_delay);
        let mut conn = self.redis.get_connection().await?;
        let result: i64 = redis::Script::new(NACK_SCRIPT)
            .key(self.inflight_key())
            .key(self.deliveries_key())
            .arg(handle.as_str())
            .arg(visible_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            Ok(())
        } else {
            Err(QueueError::UnknownHandle(handle.clone()))
        }
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let ready_key = self.ready_key(queue);
        let mut conn = self.redis.get_connection().await?;

        let ready: u64 = conn.zcount(&ready_key, "-inf", now_ms).await?;
        let delayed: u64 = conn
            .zcount(&ready_key, format!("({}", now_ms), "+inf")
            .await?;
        let oldest: Vec<(String, f64)> = conn.zrange_withscores(&ready_key, 0, 0).await?;
        let deliveries: Vec<String> = conn.hvals(self.deliveries_key()).await?;

        let marker = format!("{}|", ready_key);
        let in_flight = deliveries
            .iter()
            .filter(|v| v.starts_with(&marker))
            .count() as u64;

        let oldest_ready_age = oldest
            .first()
            .map(|(_, score)| from_millis(*score as i64, now))
            .filter(|visible_at| *visible_at <= now)
            .map(|visible_at| until(visible_at, now))
            .unwrap_or(Duration::ZERO);

        Ok(QueueStats {
            ready,
            delayed,
            in_flight,
            oldest_ready_age,
        })
    }
}
