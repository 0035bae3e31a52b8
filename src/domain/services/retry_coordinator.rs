// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::outcome::CallbackOutcome;
use crate::domain::models::task::{DeadLetterReason, DomainError, Task, TaskStatus, TaskUpdate};
use crate::domain::repositories::task_store::{StoreError, TaskStore};
use crate::infrastructure::observability::metrics::{record_dead_letter, record_resolution};
use crate::queue::scheduler::{Scheduler, SchedulerError};
use crate::utils::clock::{to_chrono, Clock};
use crate::utils::retry_policy::{BackoffPolicy, Jitter};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 重试协调错误类型
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// 任务存储错误
    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    /// 调度错误
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// 领域错误
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// 对一次回调结果的决策
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 回调成功，任务完成
    Complete,
    /// 在给定延迟后重试
    Retry { delay: Duration },
    /// 移入死信集合
    DeadLetter {
        reason: DeadLetterReason,
        message: String,
    },
}

/// 决策持久化之后的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 任务已成功
    Succeeded,
    /// 任务已回到 Pending 并重新入队
    Rescheduled { next_execute_at: DateTime<Utc> },
    /// 任务已进入死信集合
    DeadLettered { reason: DeadLetterReason },
    /// 尝试期间任务被其他操作改变（例如被取消），本次结果被丢弃
    Superseded { status: TaskStatus },
}

impl Resolution {
    /// 指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Succeeded => "succeeded",
            Resolution::Rescheduled { .. } => "rescheduled",
            Resolution::DeadLettered { .. } => "dead_lettered",
            Resolution::Superseded { .. } => "superseded",
        }
    }
}

/// 重试协调器
///
/// 将回调结果映射为任务状态机的下一步，并通过任务存储持久化。
/// 重试状态完全保存在任务记录（`current_attempt`、`next_execute_at`）中，
/// 由调度器重新入队，不在进程内循环重试。
pub struct RetryCoordinator {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    default_policy: BackoffPolicy,
    policies: HashMap<String, BackoffPolicy>,
}

impl RetryCoordinator {
    /// 创建新的重试协调器
    ///
    /// # 参数
    ///
    /// * `store` - 任务存储
    /// * `scheduler` - 调度器（用于重试入队）
    /// * `clock` - 时钟
    /// * `default_policy` - 未单独配置的任务类型使用的退避策略
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<Scheduler>,
        clock: Arc<dyn Clock>,
        default_policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            default_policy,
            policies: HashMap::new(),
        }
    }

    /// 为任务类型配置退避策略
    pub fn with_policy(mut self, task_type: impl Into<String>, policy: BackoffPolicy) -> Self {
        self.policies.insert(task_type.into(), policy);
        self
    }

    /// 任务类型对应的退避策略
    pub fn policy_for(&self, task_type: &str) -> &BackoffPolicy {
        self.policies.get(task_type).unwrap_or(&self.default_policy)
    }

    /// 第 `current_attempt` 次失败后的重试延迟
    ///
    /// 任务自身的 `retry_intervals` 优先于任务类型的策略，但仍叠加该类型的抖动
    pub fn retry_delay(&self, task: &Task) -> Duration {
        let policy = self.policy_for(&task.task_type);
        match task.retry_interval(task.current_attempt) {
            Some(interval) => BackoffPolicy {
                max_delay: policy.max_delay,
                ..BackoffPolicy::intervals(vec![interval], policy.jitter)
            }
            .delay_for(1),
            None => policy.delay_for(task.current_attempt),
        }
    }

    /// 根据回调结果做出决策，不产生副作用
    pub fn decide(&self, task: &Task, outcome: &CallbackOutcome) -> RetryDecision {
        let message = outcome.error_message().unwrap_or_default();

        match outcome {
            CallbackOutcome::Success { .. } => RetryDecision::Complete,
            CallbackOutcome::ServerError { .. }
            | CallbackOutcome::NetworkError { .. }
            | CallbackOutcome::CircuitOpen { .. }
            | CallbackOutcome::ClientError { retryable: true, .. }
            | CallbackOutcome::Redirect { retryable: true, .. } => {
                if !task.has_attempts_left() {
                    return RetryDecision::DeadLetter {
                        reason: DeadLetterReason::RetriesExhausted,
                        message,
                    };
                }

                let mut delay = self.retry_delay(task);
                // 熔断器冷却结束前重试没有意义
                if let CallbackOutcome::CircuitOpen { retry_after, .. } = outcome {
                    delay = delay.max(*retry_after);
                }
                RetryDecision::Retry { delay }
            }
            CallbackOutcome::ClientError {
                retryable: false, ..
            }
            | CallbackOutcome::Redirect {
                retryable: false, ..
            }
            | CallbackOutcome::PanicRecovered { .. } => RetryDecision::DeadLetter {
                reason: DeadLetterReason::NonRetryable,
                message,
            },
        }
    }

    /// 持久化决策
    ///
    /// 所有写入都以 `Dispatched` 为守卫；守卫失败说明任务在尝试期间被取消或
    /// 被其他路径推进，此时返回 `Resolution::Superseded`，不再入队
    ///
    /// # 参数
    ///
    /// * `task` - 处于 `Dispatched` 状态的任务（本次尝试已计入 `current_attempt`）
    /// * `outcome` - 本次尝试的结果
    #[instrument(skip(self, task, outcome), fields(task_id = %task.id, attempt = task.current_attempt))]
    pub async fn apply(
        &self,
        task: Task,
        outcome: &CallbackOutcome,
    ) -> Result<Resolution, CoordinatorError> {
        let task_id = task.id;
        let task_type = task.task_type.clone();
        let now = self.clock.now();

        let resolution = match self.decide(&task, outcome) {
            RetryDecision::Complete => {
                let done = task.succeed(now)?;
                match self.write(task_id, &done, TaskStatus::Dispatched).await? {
                    Some(status) => Resolution::Superseded { status },
                    None => Resolution::Succeeded,
                }
            }
            RetryDecision::Retry { delay } => {
                let message = outcome.error_message().unwrap_or_default();
                match self.scheduler.reschedule(task, delay, message).await {
                    Ok(stored) => Resolution::Rescheduled {
                        next_execute_at: stored.due_at(),
                    },
                    Err(SchedulerError::Store(StoreError::Conflict { actual, .. })) => {
                        Resolution::Superseded { status: actual }
                    }
                    Err(SchedulerError::BrokerUnavailable(e)) => {
                        // 任务记录已写入，对账 worker 会重新派生条目
                        warn!(task_id = %task_id, "Retry persisted but enqueue failed: {}", e);
                        Resolution::Rescheduled {
                            next_execute_at: now + to_chrono(delay),
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            RetryDecision::DeadLetter { reason, message } => {
                let failed = task.dead_letter(now, reason, message)?;
                match self.write(task_id, &failed, TaskStatus::Dispatched).await? {
                    Some(status) => Resolution::Superseded { status },
                    None => {
                        record_dead_letter(&task_type, &reason.to_string());
                        Resolution::DeadLettered { reason }
                    }
                }
            }
        };

        record_resolution(&task_type, resolution.as_str());
        match &resolution {
            Resolution::Superseded { status } => {
                info!(task_id = %task_id, status = %status, "Attempt outcome superseded")
            }
            Resolution::DeadLettered { reason } => {
                warn!(task_id = %task_id, reason = %reason, "Task moved to dead letter")
            }
            _ => {}
        }
        Ok(resolution)
    }

    /// 终态写入；返回 `Some(actual)` 表示守卫失败
    async fn write(
        &self,
        id: Uuid,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<Option<TaskStatus>, CoordinatorError> {
        let update = TaskUpdate::from_task(task).expecting(expected);
        match self.store.update_task_status(id, update).await {
            Ok(_) => Ok(None),
            Err(StoreError::Conflict { actual, .. }) => Ok(Some(actual)),
            Err(e) => Err(e.into()),
        }
    }

    /// 处理已用尽尝试次数却仍未进入终态的任务
    ///
    /// 典型场景是 worker 在最后一次尝试中崩溃：任务停留在 `Dispatched`，
    /// 重新投递时直接以 `RetriesExhausted` 移入死信
    pub async fn exhaust(&self, task: Task) -> Result<Resolution, CoordinatorError> {
        let task_id = task.id;
        let task_type = task.task_type.clone();
        let expected = task.status;
        let message = task
            .last_error
            .clone()
            .unwrap_or_else(|| "attempt abandoned before an outcome was recorded".to_string());

        let failed = task.dead_letter(
            self.clock.now(),
            DeadLetterReason::RetriesExhausted,
            message,
        )?;
        let resolution = match self.write(task_id, &failed, expected).await? {
            Some(status) => Resolution::Superseded { status },
            None => {
                record_dead_letter(&task_type, &DeadLetterReason::RetriesExhausted.to_string());
                warn!(task_id = %task_id, "Abandoned task exhausted its attempts, moved to dead letter");
                Resolution::DeadLettered {
                    reason: DeadLetterReason::RetriesExhausted,
                }
            }
        };

        record_resolution(&task_type, resolution.as_str());
        Ok(resolution)
    }
}

/// 默认退避策略：不带抖动的标准指数退避
pub fn default_policy() -> BackoffPolicy {
    BackoffPolicy {
        jitter: Jitter::None,
        ..BackoffPolicy::standard()
    }
}

#[cfg(test)]
#[path = "retry_coordinator_test.rs"]
mod tests;
