// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::Task;
use crate::domain::repositories::task_store::{DeadLetterFilter, StoreError, TaskStore};
use crate::queue::scheduler::{Scheduler, SchedulerError};
use crate::utils::clock::Clock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 批量恢复结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// 成功恢复的任务
    pub recovered: Vec<Uuid>,
    /// 恢复失败的任务及原因
    pub failed: Vec<RecoveryFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryFailure {
    pub task_id: Uuid,
    pub error: String,
}

/// 死信服务
///
/// 运维侧查询和恢复死信任务。恢复会把尝试计数归零，
/// 然后通过调度器重新进入流水线。
pub struct DeadLetterService {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterService {
    pub fn new(store: Arc<dyn TaskStore>, scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            scheduler,
            clock,
        }
    }

    /// 查询死信任务
    pub async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<Task>, StoreError> {
        self.store.list_dead_letter(filter).await
    }

    /// 恢复单个死信任务
    ///
    /// 任务记录先恢复为 Pending 再入队；入队失败时任务仍为 Pending，
    /// 由对账 worker 补齐队列条目
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 已恢复的任务
    /// * `Err(SchedulerError::Store)` - 任务不存在或不在死信集合中
    /// * `Err(SchedulerError::BrokerUnavailable)` - 已恢复但未能入队
    pub async fn recover(&self, id: Uuid) -> Result<Task, SchedulerError> {
        let task = self.store.recover_dead_letter(id, self.clock.now()).await?;
        self.scheduler.enqueue(&task).await?;
        info!(task_id = %id, "Dead-letter task recovered");
        Ok(task)
    }

    /// 按条件批量恢复
    pub async fn recover_batch(&self, filter: &DeadLetterFilter) -> Result<RecoveryReport, StoreError> {
        let candidates = self.store.list_dead_letter(filter).await?;
        let mut report = RecoveryReport::default();

        for task in candidates {
            match self.recover(task.id).await {
                Ok(_) => report.recovered.push(task.id),
                Err(e) => {
                    warn!(task_id = %task.id, "Failed to recover dead-letter task: {}", e);
                    report.failed.push(RecoveryFailure {
                        task_id: task.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            failed = report.failed.len(),
            "Batch dead-letter recovery finished"
        );
        Ok(report)
    }
}
