// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::execution_record::{ExecutionRecord, NewExecutionRecord};
use crate::domain::models::task::{DeadLetterReason, Task, TaskStatus, TaskUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// 任务存储错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Task not found: {0}")]
    NotFound(Uuid),
    /// 记录已存在
    #[error("Task already exists: {0}")]
    AlreadyExists(Uuid),
    /// 比较并设置守卫失败
    #[error("Status conflict on task {id}: expected {expected}, found {actual}")]
    Conflict {
        id: Uuid,
        expected: TaskStatus,
        actual: TaskStatus,
    },
    /// 存储内容无法解析
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// 死信查询条件
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub tenant_id: Option<Uuid>,
    pub task_type: Option<String>,
    pub reason: Option<DeadLetterReason>,
    pub limit: u64,
    pub offset: u64,
}

impl DeadLetterFilter {
    /// 判断任务是否匹配（不含分页）
    pub fn matches(&self, task: &Task) -> bool {
        task.status == TaskStatus::Failed
            && task.dead_letter_reason.is_some()
            && self.tenant_id.is_none_or(|t| t == task.tenant_id)
            && self
                .task_type
                .as_ref()
                .is_none_or(|t| *t == task.task_type)
            && self
                .reason
                .is_none_or(|r| task.dead_letter_reason == Some(r))
    }

    /// 实际使用的分页大小
    pub fn effective_limit(&self) -> u64 {
        if self.limit == 0 {
            100
        } else {
            self.limit.min(1000)
        }
    }
}

/// 任务存储特质
///
/// 调度核心只通过该接口读写任务记录，不拥有其模式与持久化细节
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 根据ID获取任务
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// 创建任务
    async fn create_task(&self, task: &Task) -> Result<Task, StoreError>;

    /// 写入状态与尝试相关字段
    ///
    /// 若 `update.expected_status` 与存储中的状态不一致则返回 `StoreError::Conflict`
    async fn update_task_status(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError>;

    /// 追加执行记录，原子地分配下一个序号
    async fn append_execution_record(
        &self,
        record: NewExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError>;

    /// 按序号升序列出任务的执行记录
    async fn list_execution_records(&self, task_id: Uuid)
        -> Result<Vec<ExecutionRecord>, StoreError>;

    /// 查询死信任务，按完成时间倒序
    async fn list_dead_letter(&self, filter: &DeadLetterFilter) -> Result<Vec<Task>, StoreError>;

    /// 恢复死信任务：尝试计数归零，状态回到 Pending
    async fn recover_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Task, StoreError>;

    /// 列出到期时间早于 `due_before` 的 Pending 任务
    async fn list_stale_pending(
        &self,
        due_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError>;

    /// 列出最近一次尝试开始于 `executed_before` 之前、仍为 Dispatched 的任务
    async fn list_stale_dispatched(
        &self,
        executed_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError>;
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        (**self).get_task(id).await
    }

    async fn create_task(&self, task: &Task) -> Result<Task, StoreError> {
        (**self).create_task(task).await
    }

    async fn update_task_status(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError> {
        (**self).update_task_status(id, update).await
    }

    async fn append_execution_record(
        &self,
        record: NewExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        (**self).append_execution_record(record).await
    }

    async fn list_execution_records(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        (**self).list_execution_records(task_id).await
    }

    async fn list_dead_letter(&self, filter: &DeadLetterFilter) -> Result<Vec<Task>, StoreError> {
        (**self).list_dead_letter(filter).await
    }

    async fn recover_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Task, StoreError> {
        (**self).recover_dead_letter(id, now).await
    }

    async fn list_stale_pending(
        &self,
        due_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        (**self).list_stale_pending(due_before, limit).await
    }

    async fn list_stale_dispatched(
        &self,
        executed_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        (**self).list_stale_dispatched(executed_before, limit).await
    }
}
