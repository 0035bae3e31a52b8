// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::execution_record::{ExecutionRecord, NewExecutionRecord};
use crate::domain::models::task::{Task, TaskStatus, TaskUpdate};
use crate::domain::repositories::task_store::{DeadLetterFilter, StoreError, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    tasks: HashMap<Uuid, Task>,
    records: HashMap<Uuid, Vec<ExecutionRecord>>,
}

/// 内存任务存储
///
/// 用于开发和测试；所有读改写都在同一把锁下完成，
/// 因此状态守卫和执行记录序号分配都是原子的
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的任务数量
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.state.lock().tasks.get(&id).cloned())
    }

    async fn create_task(&self, task: &Task) -> Result<Task, StoreError> {
        let mut state = self.state.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::AlreadyExists(task.id));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn update_task_status(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(expected) = update.expected_status {
            if task.status != expected {
                return Err(StoreError::Conflict {
                    id,
                    expected,
                    actual: task.status,
                });
            }
        }

        update.apply_to(task);
        Ok(task.clone())
    }

    async fn append_execution_record(
        &self,
        record: NewExecutionRecord,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut state = self.state.lock();
        if !state.tasks.contains_key(&record.task_id) {
            return Err(StoreError::NotFound(record.task_id));
        }

        let records = state.records.entry(record.task_id).or_default();
        let sequence = records.len() as u64 + 1;
        let record = record.into_record(sequence);
        records.push(record.clone());
        Ok(record)
    }

    async fn list_execution_records(
        &self,
        task_id: Uuid,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .records
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_dead_letter(&self, filter: &DeadLetterFilter) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(a.id.cmp(&b.id)));

        Ok(tasks
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn recover_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Task, StoreError> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let recovered = task.clone().recover(now).map_err(|_| StoreError::Conflict {
            id,
            expected: TaskStatus::Failed,
            actual: task.status,
        })?;
        *task = recovered.clone();
        Ok(recovered)
    }

    async fn list_stale_pending(
        &self,
        due_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.due_at() < due_before)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.due_at());
        tasks.truncate(limit as usize);
        Ok(tasks)
    }

    async fn list_stale_dispatched(
        &self,
        executed_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Task>, StoreError> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Dispatched
                    && t.executed_at.is_some_and(|at| at < executed_before)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.executed_at);
        tasks.truncate(limit as usize);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::outcome::CallbackOutcome;
    use crate::domain::models::task::{CallbackTarget, DeadLetterReason, TaskDefaults};

    fn task(now: DateTime<Utc>) -> Task {
        Task::new(
            Uuid::new_v4(),
            "user.signup",
            CallbackTarget::post("http://localhost/hook"),
            &TaskDefaults::default(),
            now,
        )
    }

    fn record(task_id: Uuid, attempt: u32, now: DateTime<Utc>) -> NewExecutionRecord {
        NewExecutionRecord::from_outcome(
            task_id,
            attempt,
            "worker-1",
            now,
            12,
            &CallbackOutcome::ServerError { status: 500 },
            None,
            "trace",
        )
    }

    #[tokio::test]
    async fn test_status_guard_conflict() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let created = store.create_task(&task(now)).await.unwrap();

        let cancelled = created.clone().cancel(now).unwrap();
        let update = TaskUpdate::from_task(&cancelled).expecting(TaskStatus::Dispatched);
        let result = store.update_task_status(created.id, update).await;

        assert!(matches!(
            result,
            Err(StoreError::Conflict {
                expected: TaskStatus::Dispatched,
                actual: TaskStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sequences_are_gapless_per_task() {
        let store = std::sync::Arc::new(InMemoryTaskStore::new());
        let now = Utc::now();
        let a = store.create_task(&task(now)).await.unwrap();
        let b = store.create_task(&task(now)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let id = if i % 2 == 0 { a.id } else { b.id };
            handles.push(tokio::spawn(async move {
                store.append_execution_record(record(id, 1, now)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let seqs: Vec<u64> = store
            .list_execution_records(a.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_dead_letter_recover() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let created = store.create_task(&task(now)).await.unwrap();
        let failed = created
            .dispatch(now)
            .unwrap()
            .dead_letter(now, DeadLetterReason::NonRetryable, "404")
            .unwrap();
        store
            .update_task_status(failed.id, TaskUpdate::from_task(&failed))
            .await
            .unwrap();

        let listed = store
            .list_dead_letter(&DeadLetterFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let recovered = store.recover_dead_letter(failed.id, now).await.unwrap();
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.current_attempt, 0);
        assert_eq!(recovered.last_error.as_deref(), Some("404"));

        let again = store.recover_dead_letter(failed.id, now).await;
        assert!(matches!(again, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_stale_dispatched_is_oldest_first() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();

        let mut started = Vec::new();
        for minutes_ago in [5, 30, 15] {
            let created = store.create_task(&task(now)).await.unwrap();
            let running = created
                .dispatch(now - chrono::Duration::minutes(minutes_ago))
                .unwrap();
            let update = TaskUpdate::from_task(&running).expecting(TaskStatus::Pending);
            store.update_task_status(running.id, update).await.unwrap();
            started.push(running.id);
        }

        let stale = store
            .list_stale_dispatched(now - chrono::Duration::minutes(10), 10)
            .await
            .unwrap();
        let ids: Vec<Uuid> = stale.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![started[1], started[2]]);

        let limited = store
            .list_stale_dispatched(now - chrono::Duration::minutes(10), 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, started[1]);
    }
}
