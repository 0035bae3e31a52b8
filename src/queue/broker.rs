// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_entry::{AckHandle, Delivery, QueueEntry};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 队列错误类型
#[derive(Error, Debug)]
pub enum QueueError {
    /// 代理拒绝写入或不可达
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// 确认句柄未知（已确认、已超时重投或从未存在）
    #[error("Unknown ack handle: {0}")]
    UnknownHandle(AckHandle),

    /// 条目编解码失败
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::BrokerUnavailable(err.to_string())
    }
}

/// 单个队列的统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// 已可见、等待出队的条目数
    pub ready: u64,
    /// 尚未到可见时间的条目数
    pub delayed: u64,
    /// 已出队未确认的条目数
    pub in_flight: u64,
    /// 最早可见的就绪条目已等待的时长
    pub oldest_ready_age: Duration,
}

impl QueueStats {
    /// 积压总数
    pub fn pending(&self) -> u64 {
        self.ready + self.delayed
    }
}

/// 队列代理特质
///
/// 提供具名队列、延迟可见以及确认/否认语义
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// 入队，条目在 `delay` 之后可见
    async fn enqueue(&self, entry: QueueEntry, delay: Duration) -> Result<(), QueueError>;

    /// 非阻塞出队
    ///
    /// 按给定顺序依次尝试每个队列，返回第一个有就绪条目的队列中的投递；
    /// 权重选择由调用方决定顺序
    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>, QueueError>;

    /// 确认投递已处理完毕
    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError>;

    /// 否认投递，条目在 `requeue_delay` 之后重新可见
    async fn nack(&self, handle: &AckHandle, requeue_delay: Duration) -> Result<(), QueueError>;

    /// 队列统计
    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<T: QueueBroker + ?Sized> QueueBroker for Arc<T> {
    async fn enqueue(&self, entry: QueueEntry, delay: Duration) -> Result<(), QueueError> {
        (**self).enqueue(entry, delay).await
    }

    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>, QueueError> {
        (**self).dequeue(queues).await
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        (**self).ack(handle).await
    }

    async fn nack(&self, handle: &AckHandle, requeue_delay: Duration) -> Result<(), QueueError> {
        (**self).nack(handle, requeue_delay).await
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        (**self).stats(queue).await
    }
}
