// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_entry::QueueEntry;
use crate::domain::models::task::{DomainError, Task, TaskStatus, TaskUpdate};
use crate::domain::repositories::task_store::{StoreError, TaskStore};
use crate::queue::broker::{QueueBroker, QueueError};
use crate::queue::topology::QueueTopology;
use crate::utils::clock::{until, Clock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// 调度错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// 代理拒绝写入；任务记录仍是事实来源，可重新派生条目
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// 任务存储错误
    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    /// 终态任务不可再入队
    #[error("Task {id} is terminal ({status}) and cannot be enqueued")]
    TerminalTask { id: Uuid, status: TaskStatus },

    /// 领域错误
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        SchedulerError::BrokerUnavailable(err.to_string())
    }
}

/// 任务调度器
///
/// 将任务期望的下一次执行时间转换为队列条目
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn QueueBroker>,
    topology: QueueTopology,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// 创建新的调度器实例
    ///
    /// # 参数
    ///
    /// * `store` - 任务存储
    /// * `broker` - 队列代理
    /// * `topology` - 队列拓扑
    /// * `clock` - 时钟
    pub fn new(
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn QueueBroker>,
        topology: QueueTopology,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            broker,
            topology,
            clock,
        }
    }

    /// 队列拓扑
    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// 注册新任务：先持久化，再入队
    ///
    /// 入队失败时返回 `BrokerUnavailable`，但任务记录已保存，
    /// 对账 worker 会在之后重新派生条目
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 已持久化并入队的任务
    /// * `Err(SchedulerError)` - 持久化或入队失败
    #[instrument(skip(self, task), fields(task_id = %task.id, tenant_id = %task.tenant_id))]
    pub async fn submit(&self, task: Task) -> Result<Task, SchedulerError> {
        let created = self.store.create_task(&task).await?;
        self.enqueue(&created).await?;
        Ok(created)
    }

    /// 将任务入队
    ///
    /// 投递延迟 = `max(0, due_at - now)`，其中 `due_at` 为 `next_execute_at`（若有）或 `scheduled_at`
    ///
    /// # 返回值
    ///
    /// * `Ok(QueueEntry)` - 写入代理的条目
    /// * `Err(SchedulerError::TerminalTask)` - 任务已处于终态
    /// * `Err(SchedulerError::BrokerUnavailable)` - 代理拒绝写入
    pub async fn enqueue(&self, task: &Task) -> Result<QueueEntry, SchedulerError> {
        if task.status.is_terminal() {
            return Err(SchedulerError::TerminalTask {
                id: task.id,
                status: task.status,
            });
        }

        let now = self.clock.now();
        let delay = until(now, task.due_at());
        let entry = QueueEntry::new(
            task.id,
            self.topology.queue_for(task.priority),
            self.topology.weight_of(task.priority),
            now,
        );

        if let Err(e) = self.broker.enqueue(entry.clone(), delay).await {
            error!(task_id = %task.id, "Failed to enqueue task: {}", e);
            return Err(e.into());
        }

        debug!(
            task_id = %task.id,
            queue = %entry.queue,
            delay_ms = delay.as_millis() as u64,
            "Task enqueued"
        );
        Ok(entry)
    }

    /// 重试调度：设置 `next_execute_at = now + delay`，写入任务存储后按该延迟入队
    ///
    /// 写入以 `Dispatched` 为守卫，任务在尝试期间被取消时返回 `StoreError::Conflict`
    pub async fn reschedule(
        &self,
        task: Task,
        delay: Duration,
        error: impl Into<String>,
    ) -> Result<Task, SchedulerError> {
        let now = self.clock.now();
        let pending = task.retry_at(now, delay, error)?;
        let update = TaskUpdate::from_task(&pending).expecting(TaskStatus::Dispatched);
        let stored = self.store.update_task_status(pending.id, update).await?;

        self.enqueue(&stored).await?;
        Ok(stored)
    }
}
