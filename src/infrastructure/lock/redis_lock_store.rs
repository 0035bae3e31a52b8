// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::lock_store::{LockStore, LockStoreError};
use crate::infrastructure::cache::redis_client::RedisClient;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

const RENEW_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
        return 1
    end
    return 0
"#;

const DELETE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    end
    return 0
"#;

/// Redis 锁存储
///
/// 获取使用 `SET NX PX`，续期与释放使用 Lua 脚本做比较并设置
#[derive(Clone)]
pub struct RedisLockStore {
    redis: RedisClient,
}

impl RedisLockStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.redis.get_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_renew(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let mut conn = self.redis.get_connection().await?;
        let result: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new_value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockStoreError> {
        let mut conn = self.redis.get_connection().await?;
        let result: i64 = redis::Script::new(DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError> {
        let mut conn = self.redis.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
