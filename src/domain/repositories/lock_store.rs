// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// 锁存储错误类型
#[derive(Error, Debug)]
pub enum LockStoreError {
    /// 后端不可用
    #[error("Lock store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for LockStoreError {
    fn from(err: redis::RedisError) -> Self {
        LockStoreError::Unavailable(err.to_string())
    }
}

/// 锁存储特质
///
/// 提供以字符串为键、带 TTL 的原子条件写入原语
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 键不存在（或已过期）时写入，返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, LockStoreError>;

    /// 当前值等于 `expected` 时替换为 `new_value` 并重置 TTL
    async fn compare_and_renew(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError>;

    /// 当前值等于 `expected` 时删除
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockStoreError>;

    /// 读取当前值
    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError>;
}
