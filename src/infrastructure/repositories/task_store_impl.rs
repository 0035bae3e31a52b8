// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::execution_record::{ExecutionRecord, NewExecutionRecord};
use crate::domain::models::task::{Task, TaskStatus, TaskUpdate};
use crate::domain::repositories::task_store::{DeadLetterFilter, StoreError, TaskStore};
use crate::infrastructure::database::entities::{
    dispatch_execution_record as record_entity, dispatch_task as task_entity,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 基于 SeaORM 的任务存储
///
/// 执行记录序号由任务行上的 `last_sequence` 计数器在事务内分配，
/// 行级写锁保证并发追加时序号无间隙
#[derive(Clone)]
pub struct SeaOrmTaskStore {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl SeaOrmTaskStore {
    /// 创建新的任务存储实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn current_status<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<TaskStatus, StoreError> {
        let model = task_entity::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        parse(&model.status)
    }
}

fn parse<T: std::str::FromStr>(value: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

fn to_fixed(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.into()
}

fn to_utc(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

impl TryFrom<task_entity::Model> for Task {
    type Error = StoreError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            tenant_id: model.tenant_id,
            task_type: model.task_type,
            callback: serde_json::from_value(model.callback)
                .map_err(|e| StoreError::Corrupt(format!("callback: {}", e)))?,
            priority: parse(&model.priority)?,
            max_attempts: model.max_attempts.max(0) as u32,
            retry_intervals: serde_json::from_value(model.retry_intervals)
                .map_err(|e| StoreError::Corrupt(format!("retry_intervals: {}", e)))?,
            timeout_secs: model.timeout_secs.map(|s| s.max(0) as u64),
            current_attempt: model.current_attempt.max(0) as u32,
            status: parse(&model.status)?,
            scheduled_at: to_utc(model.scheduled_at),
            next_execute_at: model.next_execute_at.map(to_utc),
            executed_at: model.executed_at.map(to_utc),
            completed_at: model.completed_at.map(to_utc),
            expires_at: model.expires_at.map(to_utc),
            last_error: model.last_error,
            dead_letter_reason: model
                .dead_letter_reason
                .as_deref()
                .map(parse)
                .transpose()?,
            created_at: to_utc(model.created_at),
            updated_at: to_utc(model.updated_at),
        })
    }
}

fn to_active_model(task: &Task) -> Result<task_entity::ActiveModel, StoreError> {
    Ok(task_entity::ActiveModel {
        id: Set(task.id),
        tenant_id: Set(task.tenant_id),
        task_type: Set(task.task_type.clone()),
        callback: Set(serde_json::to_value(&task.callback)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?),
        priority: Set(task.priority.to_string()),
        max_attempts: Set(task.max_attempts as i32),
        retry_intervals: Set(serde_json::to_value(&task.retry_intervals)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?),
        timeout_secs: Set(task.timeout_secs.map(|s| s as i64)),
        current_attempt: Set(task.current_attempt as i32),
        status: Set(task.status.to_string()),
        scheduled_at: Set(to_fixed(task.scheduled_at)),
        next_execute_at: Set(task.next_execute_at.map(to_fixed)),
        executed_at: Set(task.executed_at.map(to_fixed)),
        completed_at: Set(task.completed_at.map(to_fixed)),
        expires_at: Set(task.expires_at.map(to_fixed)),
        last_error: Set(task.last_error.clone()),
        dead_letter_reason: Set(task.dead_letter_reason.map(|r| r.to_string())),
        last_sequence: Set(0),
        created_at: Set(to_fixed(task.created_at)),
        updated_at: Set(to_fixed(task.updated_at)),
    })
}

/// 只包含 `TaskUpdate` 字段的 ActiveModel，其余列保持 NotSet
fn update_model(update: &TaskUpdate) -> task_entity::ActiveModel {
    task_entity::ActiveModel {
        status: Set(update.status.to_string()),
        current_attempt: Set(update.current_attempt as i32),
        next_execute_at: Set(update.next_execute_at.map(to_fixed)),
        executed_at: Set(update.executed_at.map(to_fixed)),
        completed_at: Set(update.completed_at.map(to_fixed)),
        last_error: Set(update.last_error.clone()),
        dead_letter_reason: Set(update.dead_letter_reason.map(|r| r.to_string())),
        updated_at: Set(to_fixed(update.updated_at)),
        ..Default::default()
    }
}

impl TryFrom<record_entity::Model> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(model: record_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            task_id: model.task_id,
            sequence: model.sequence.max(0) as u64,
            attempt: model.attempt.max(0) as u32,
            worker_id: model.worker_id,
            started_at: to_utc(model.started_at),
            duration_ms: model.duration_ms.max(0) as u64,
            outcome: parse(&model.outcome)?,
            http_status: model.http_status.map(|s| s as u16),
            error_message: model.error_message,
            response_body: model.response_body,
            trace_id: model.trace_id,
        })
    }
}

#[async_trait]
impl TaskStore for SeaOrmTaskStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn create_task(&self, task: &Task) -> Result<Task, StoreError> {
        if task_entity::Entity::find_by_id(task.id)
            .one(self.db.as_ref())
            .await?
            .is_some()
        {
            return Err(StoreError::AlreadyExists(task.id));
        }

        to_active_model(task)?.insert(self.db.as_ref()).await?;
        Ok(task.clone())
    }

    async fn update_task_status(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError> {
        let txn = self.db.begin().await?;

        let mut query = task_entity::Entity::update_many()
            .set(update_model(&update))
            .filter(task_entity::Column::Id.eq(id));
        if let Some(expected) = update.expected_status {
            query = query.filter(task_entity::Column::Status.eq(expected.to_string()));
        }

        let result = query.exec(&txn).await?;
        if result.rows_affected == 0 {
            let actual = Self::current_status(&txn, id).await?;
            return Err(match update.expected_status {
                Some(expected) => StoreError::Conflict {
                    id,
                    expected,
                    actual,
                },
                None => StoreError::NotFound(id),
            });
        }

        let model = task_entity::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        txn.commit().await?;

        Task::try_from(model)
    }

    async fn append_execution_record(
        &self,
        record: NewExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        let task_id = record.task_id;
        let txn = self.db.begin().await?;

        // 先递增计数器以获取行写锁，后续读取看到的就是本事务分配的序号
        let bumped = task_entity::Entity::update_many()
            .col_expr(
                task_entity::Column::LastSequence,
                Expr::col(task_entity::Column::LastSequence).add(1),
            )
            .filter(task_entity::Column::Id.eq(task_id))
            .exec(&txn)
            .await?;
        if bumped.rows_affected == 0 {
            return Err(StoreError::NotFound(task_id));
        }

        let sequence = task_entity::Entity::find_by_id(task_id)
            .one(&txn)
            .await?
            .ok_or(StoreError::NotFound(task_id))?
            .last_sequence;

        let record = record.into_record(sequence as u64);
        let model = record_entity::ActiveModel {
            id: Set(record.id),
            task_id: Set(record.task_id),
            sequence: Set(sequence),
            attempt: Set(record.attempt as i32),
            worker_id: Set(record.worker_id.clone()),
            started_at: Set(to_fixed(record.started_at)),
            duration_ms: Set(record.duration_ms as i64),
            outcome: Set(record.outcome.to_string()),
            http_status: Set(record.http_status.map(i32::from)),
            error_message: Set(record.error_message.clone()),
            response_body: Set(record.response_body.clone()),
            trace_id: Set(record.trace_id.clone()),
        };
        model.insert(&txn).await?;
        txn.commit().await?;

        debug!(task_id = %task_id, sequence, "Execution record appended");
        Ok(record)
    }

    async fn list_execution_records(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        record_entity::Entity::find()
            .filter(record_entity::Column::TaskId.eq(task_id))
            .order_by_asc(record_entity::Column::Sequence)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(ExecutionRecord::try_from)
            .collect()
    }

    async fn list_dead_letter(&self, filter: &DeadLetterFilter) -> Result<Vec<Task>, StoreError> {
        let mut condition = Condition::all()
            .add(task_entity::Column::Status.eq(TaskStatus::Failed.to_string()))
            .add(task_entity::Column::DeadLetterReason.is_not_null());
        if let Some(tenant_id) = filter.tenant_id {
            condition = condition.add(task_entity::Column::TenantId.eq(tenant_id));
        }
        if let Some(task_type) = &filter.task_type {
            condition = condition.add(task_entity::Column::TaskType.eq(task_type.clone()));
        }
        if let Some(reason) = filter.reason {
            condition = condition.add(task_entity::Column::DeadLetterReason.eq(reason.to_string()));
        }

        task_entity::Entity::find()
            .filter(condition)
            .order_by_desc(task_entity::Column::CompletedAt)
            .order_by_asc(task_entity::Column::Id)
            .offset(filter.offset)
            .limit(filter.effective_limit())
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn recover_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let task = self.get_task(id).await?.ok_or(StoreError::NotFound(id))?;
        let actual = task.status;
        let recovered = task.recover(now).map_err(|_| StoreError::Conflict {
            id,
            expected: TaskStatus::Failed,
            actual,
        })?;

        let update = TaskUpdate::from_task(&recovered).expecting(TaskStatus::Failed);
        self.update_task_status(id, update).await
    }

    async fn list_stale_pending(
        &self,
        due_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        let due_before = to_fixed(due_before);
        let overdue = Condition::any()
            .add(task_entity::Column::NextExecuteAt.lt(due_before))
            .add(
                Condition::all()
                    .add(task_entity::Column::NextExecuteAt.is_null())
                    .add(task_entity::Column::ScheduledAt.lt(due_before)),
            );

        task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Pending.to_string()))
            .filter(overdue)
            .order_by_asc(task_entity::Column::ScheduledAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn list_stale_dispatched(
        &self,
        executed_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        task_entity::Entity::find()
            .filter(task_entity::Column::Status.eq(TaskStatus::Dispatched.to_string()))
            .filter(task_entity::Column::ExecutedAt.lt(to_fixed(executed_before)))
            .order_by_asc(task_entity::Column::ExecutedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }
}

#[cfg(test)]
#[path = "task_store_impl_test.rs"]
mod tests;
