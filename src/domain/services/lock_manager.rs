// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lock::Lock;
use crate::domain::repositories::lock_store::{LockStore, LockStoreError};
use crate::utils::clock::{to_chrono, Clock};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// 锁错误类型
#[derive(Error, Debug)]
pub enum LockError {
    /// 锁被其他持有者占用（预期的并发结果，不是故障）
    #[error("Lock for task {0} is held by another worker")]
    Contention(Uuid),

    /// 锁已丢失（过期或被抢占），调用方必须停止工作
    #[error("Lock for task {0} was lost")]
    Lost(Uuid),

    /// 锁存储错误
    #[error("Lock store error: {0}")]
    Store(#[from] LockStoreError),
}

/// 锁管理器
///
/// 基于共享键值存储的原子条件写入，保证同一任务同时只有一个 worker 执行
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
    last_version: Arc<AtomicU64>,
}

impl LockManager {
    /// 创建新的锁管理器
    ///
    /// # 参数
    ///
    /// * `store` - 锁存储
    /// * `clock` - 时钟
    /// * `key_prefix` - 键前缀
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            key_prefix: key_prefix.into(),
            last_version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 任务锁的键
    pub fn lock_key(&self, task_id: Uuid) -> String {
        format!("{}:lock:task:{}", self.key_prefix, task_id)
    }

    /// 获取锁，从不阻塞
    ///
    /// # 返回值
    ///
    /// * `Ok(Lock)` - 获取成功
    /// * `Err(LockError::Contention)` - 锁被占用
    /// * `Err(LockError::Store)` - 锁存储不可用
    pub async fn acquire(&self, task_id: Uuid, holder: &str, ttl: Duration) -> Result<Lock, LockError> {
        let now = self.clock.now();
        let lock = Lock {
            task_id,
            key: self.lock_key(task_id),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + to_chrono(ttl),
            version: self.next_version(now),
        };

        if self.store.set_if_absent(&lock.key, &lock.token(), ttl).await? {
            debug!(task_id = %task_id, holder, "Lock acquired");
            Ok(lock)
        } else {
            debug!(task_id = %task_id, holder, "Lock contention");
            Err(LockError::Contention(task_id))
        }
    }

    /// 新一次获取的起始版本：以获取时刻的毫秒数为种子，低 16 位留给续期，同一管理器内严格递增
    fn next_version(&self, now: DateTime<Utc>) -> u64 {
        let seed = (now.timestamp_millis().max(0) as u64) << 16;
        let previous = self
            .last_version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(seed.max(last + 1)))
            .unwrap_or_else(|last| last);
        seed.max(previous + 1)
    }

    /// 续期已持有的锁
    ///
    /// 令牌不再匹配时返回 `LockError::Lost`；成功时版本号递增
    pub async fn renew(&self, lock: &Lock, ttl: Duration) -> Result<Lock, LockError> {
        let now = self.clock.now();
        let renewed = Lock {
            expires_at: now + to_chrono(ttl),
            version: lock.version + 1,
            ..lock.clone()
        };

        let swapped = self
            .store
            .compare_and_renew(&lock.key, &lock.token(), &renewed.token(), ttl)
            .await?;

        if swapped {
            Ok(renewed)
        } else {
            warn!(task_id = %lock.task_id, holder = %lock.holder, "Lock lost during renewal");
            Err(LockError::Lost(lock.task_id))
        }
    }

    /// 释放锁
    ///
    /// 返回 `false` 表示锁已过期或已被他人持有，此时不做任何操作
    pub async fn release(&self, lock: &Lock) -> Result<bool, LockError> {
        let released = self.store.compare_and_delete(&lock.key, &lock.token()).await?;
        if !released {
            debug!(task_id = %lock.task_id, "Lock already expired or taken over before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
#[path = "lock_manager_test.rs"]
mod tests;
