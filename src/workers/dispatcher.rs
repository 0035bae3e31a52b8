// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::lock::Lock;
use crate::domain::models::outcome::OutcomeClass;
use crate::domain::models::queue_entry::Delivery;
use crate::domain::models::task::{Task, TaskStatus, TaskUpdate};
use crate::domain::repositories::task_store::{StoreError, TaskStore};
use crate::domain::services::lock_manager::{LockError, LockManager};
use crate::domain::services::retry_coordinator::{Resolution, RetryCoordinator};
use crate::engines::traits::{CallbackInvoker, CallbackRequest};
use crate::infrastructure::observability::metrics::{record_lock_contention, record_lock_lost};
use crate::queue::broker::QueueBroker;
use crate::queue::health_monitor::QueueHealthMonitor;
use crate::queue::topology::QueueTopology;
use crate::queue::weighted_selector::WeightedSelector;
use crate::utils::clock::{until, Clock};
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_shutdown, Worker};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// 派发工作器配置
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 任务锁 TTL，必须大于回调超时上限
    pub lock_ttl: Duration,
    /// 尝试期间的锁续期间隔
    pub renew_interval: Duration,
    /// 空闲退避下限
    pub min_idle_backoff: Duration,
    /// 空闲退避上限
    pub max_idle_backoff: Duration,
    /// 基础设施错误后的等待时长
    pub transient_retry: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(120),
            renew_interval: Duration::from_secs(30),
            min_idle_backoff: Duration::from_millis(50),
            max_idle_backoff: Duration::from_secs(2),
            transient_retry: Duration::from_secs(1),
        }
    }
}

/// 条目被确认但未执行的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// 另一个 worker 持有任务锁
    LockContention,
    /// 任务记录不存在
    NotFound,
    /// 任务已处于终态
    Terminal(TaskStatus),
    /// 任务已过期并被标记
    Expired,
}

/// 单个派发周期的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// 所有队列均无可见条目
    Idle,
    /// 条目已确认，未执行回调
    Skipped { task_id: Uuid, reason: SkipReason },
    /// 任务尚未到期，条目按剩余延迟退回
    Deferred { task_id: Uuid, delay: Duration },
    /// 完成一次回调尝试
    Attempted {
        task_id: Uuid,
        outcome: OutcomeClass,
        resolution: Resolution,
    },
    /// 尝试次数已在之前的投递中耗尽，直接结算
    Exhausted { task_id: Uuid, resolution: Resolution },
    /// 尝试期间锁丢失，条目已退回，结果未记录
    LockLost { task_id: Uuid },
}

/// 派发工作器共享的依赖
#[derive(Clone)]
pub struct DispatchContext {
    pub broker: Arc<dyn QueueBroker>,
    pub store: Arc<dyn TaskStore>,
    pub locks: LockManager,
    pub invoker: Arc<dyn CallbackInvoker>,
    pub coordinator: Arc<RetryCoordinator>,
    pub monitor: Arc<QueueHealthMonitor>,
    pub topology: QueueTopology,
    pub clock: Arc<dyn Clock>,
    pub config: DispatcherConfig,
}

/// 派发工作器
///
/// 每个周期按加权轮询顺序出队一个条目，在任务锁的保护下执行一次回调，
/// 结果交给重试协调器推进状态机后再确认条目。
pub struct DispatchWorker {
    id: String,
    ctx: DispatchContext,
    selector: Mutex<WeightedSelector>,
}

impl DispatchWorker {
    /// 创建新的派发工作器
    ///
    /// # 参数
    ///
    /// * `id` - 工作器标识，同时作为锁持有者
    /// * `ctx` - 共享依赖
    pub fn new(id: impl Into<String>, ctx: DispatchContext) -> Self {
        let selector = WeightedSelector::new(ctx.topology.queues());
        Self {
            id: id.into(),
            ctx,
            selector: Mutex::new(selector),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 执行一个派发周期
    ///
    /// # 返回值
    ///
    /// * `Ok(CycleOutcome)` - 周期结果
    /// * `Err(WorkerError)` - 代理、锁存储或任务存储故障；条目已尽量退回
    pub async fn poll_once(&self) -> Result<CycleOutcome, WorkerError> {
        let order = self.selector.lock().next_order();
        match self.ctx.broker.dequeue(&order).await? {
            None => Ok(CycleOutcome::Idle),
            Some(delivery) => {
                let span = info_span!(
                    "dispatch",
                    worker = %self.id,
                    task_id = %delivery.entry.task_id,
                    queue = %delivery.entry.queue
                );
                self.handle(delivery).instrument(span).await
            }
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<CycleOutcome, WorkerError> {
        let task_id = delivery.entry.task_id;
        let ttl = self.ctx.config.lock_ttl;

        let lock = match self.ctx.locks.acquire(task_id, &self.id, ttl).await {
            Ok(lock) => lock,
            Err(LockError::Contention(_)) => {
                record_lock_contention();
                self.ack(&delivery).await;
                return Ok(CycleOutcome::Skipped {
                    task_id,
                    reason: SkipReason::LockContention,
                });
            }
            Err(e) => {
                self.nack(&delivery, self.ctx.config.transient_retry).await;
                return Err(e.into());
            }
        };

        let result = self.process(&delivery, lock).await;
        if result.is_err() {
            self.nack(&delivery, self.ctx.config.transient_retry).await;
        }
        result
    }

    /// 在持有锁的前提下处理一个条目；除锁丢失外，返回前锁都已释放
    async fn process(&self, delivery: &Delivery, lock: Lock) -> Result<CycleOutcome, WorkerError> {
        let task_id = delivery.entry.task_id;
        let now = self.ctx.clock.now();

        let task = match self.ctx.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!("Queue entry references a missing task");
                return self
                    .skip(delivery, &lock, task_id, SkipReason::NotFound)
                    .await;
            }
            Err(e) => {
                self.release(&lock).await;
                return Err(e.into());
            }
        };

        if task.status.is_terminal() {
            debug!(status = %task.status, "Task already terminal, dropping entry");
            return self
                .skip(delivery, &lock, task_id, SkipReason::Terminal(task.status))
                .await;
        }

        if task.is_expired(now) {
            return self.expire(delivery, &lock, task).await;
        }

        if task.status == TaskStatus::Pending && task.due_at() > now {
            let delay = until(now, task.due_at());
            debug!(delay_ms = delay.as_millis() as u64, "Task not yet due, deferring entry");
            self.release(&lock).await;
            self.nack(delivery, delay).await;
            return Ok(CycleOutcome::Deferred { task_id, delay });
        }

        if !task.has_attempts_left() {
            let resolution = match self.ctx.coordinator.exhaust(task).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    self.release(&lock).await;
                    return Err(e.into());
                }
            };
            self.release(&lock).await;
            self.ack(delivery).await;
            return Ok(CycleOutcome::Exhausted {
                task_id,
                resolution,
            });
        }

        let expected = task.status;
        let running = match task.dispatch(now) {
            Ok(running) => running,
            Err(e) => {
                self.release(&lock).await;
                return Err(WorkerError::InternalError(e.to_string()));
            }
        };
        let update = TaskUpdate::from_task(&running).expecting(expected);
        let running = match self.ctx.store.update_task_status(task_id, update).await {
            Ok(stored) => stored,
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(status = %actual, "Task changed before dispatch");
                let reason = if actual.is_terminal() {
                    SkipReason::Terminal(actual)
                } else {
                    SkipReason::LockContention
                };
                return self.skip(delivery, &lock, task_id, reason).await;
            }
            Err(e) => {
                self.release(&lock).await;
                return Err(e.into());
            }
        };

        self.attempt(delivery, lock, running).await
    }

    async fn attempt(
        &self,
        delivery: &Delivery,
        mut lock: Lock,
        running: Task,
    ) -> Result<CycleOutcome, WorkerError> {
        let task_id = running.id;
        let trace_id = Uuid::new_v4().to_string();
        let request = CallbackRequest::from_task(&running, trace_id, self.id.as_str());

        info!(
            attempt = running.current_attempt,
            max_attempts = running.max_attempts,
            trace_id = %request.trace_id,
            "Dispatching callback"
        );

        let invoked = {
            let heartbeat = keep_alive(
                &self.ctx.locks,
                &mut lock,
                self.ctx.config.lock_ttl,
                self.ctx.config.renew_interval,
            );
            tokio::select! {
                result = self.ctx.invoker.invoke(&request) => Some(result),
                lost = heartbeat => {
                    record_lock_lost();
                    warn!("Lock lost mid-attempt, aborting: {}", lost);
                    None
                }
            }
        };

        let result = match invoked {
            Some(result) => result,
            None => {
                self.nack(delivery, self.ctx.config.transient_retry).await;
                return Ok(CycleOutcome::LockLost { task_id });
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.release(&lock).await;
                return Err(e.into());
            }
        };

        let resolution = match self.ctx.coordinator.apply(running, &result.outcome).await {
            Ok(resolution) => resolution,
            Err(e) => {
                self.release(&lock).await;
                return Err(e.into());
            }
        };

        self.release(&lock).await;
        self.ack(delivery).await;
        self.ctx
            .monitor
            .record_outcome(&delivery.entry.queue, result.outcome.is_success());

        Ok(CycleOutcome::Attempted {
            task_id,
            outcome: result.outcome.class(),
            resolution,
        })
    }

    async fn expire(
        &self,
        delivery: &Delivery,
        lock: &Lock,
        task: Task,
    ) -> Result<CycleOutcome, WorkerError> {
        let task_id = task.id;
        let expected = task.status;
        let expired = match task.expire(self.ctx.clock.now()) {
            Ok(expired) => expired,
            Err(e) => {
                self.release(lock).await;
                return Err(WorkerError::InternalError(e.to_string()));
            }
        };

        let update = TaskUpdate::from_task(&expired).expecting(expected);
        match self.ctx.store.update_task_status(task_id, update).await {
            Ok(_) => info!("Task expired before dispatch"),
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(status = %actual, "Task changed before it could be expired")
            }
            Err(e) => {
                self.release(lock).await;
                return Err(e.into());
            }
        }

        self.skip(delivery, lock, task_id, SkipReason::Expired).await
    }

    async fn skip(
        &self,
        delivery: &Delivery,
        lock: &Lock,
        task_id: Uuid,
        reason: SkipReason,
    ) -> Result<CycleOutcome, WorkerError> {
        self.release(lock).await;
        self.ack(delivery).await;
        Ok(CycleOutcome::Skipped { task_id, reason })
    }

    async fn release(&self, lock: &Lock) {
        if let Err(e) = self.ctx.locks.release(lock).await {
            warn!(task_id = %lock.task_id, "Failed to release lock: {}", e);
        }
    }

    /// 确认失败不影响结果：任务记录已是最新状态，重复投递会被识别并丢弃
    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.ctx.broker.ack(&delivery.handle).await {
            warn!(handle = %delivery.handle, "Failed to ack delivery: {}", e);
        }
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) {
        if let Err(e) = self.ctx.broker.nack(&delivery.handle, delay).await {
            warn!(handle = %delivery.handle, "Failed to nack delivery: {}", e);
        }
    }
}

/// 周期性续期锁，续期失败时返回对应错误
async fn keep_alive(locks: &LockManager, lock: &mut Lock, ttl: Duration, every: Duration) -> LockError {
    loop {
        tokio::time::sleep(every).await;
        match locks.renew(lock, ttl).await {
            Ok(renewed) => *lock = renewed,
            Err(e) => return e,
        }
    }
}

#[async_trait]
impl Worker for DispatchWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(worker = %self.id, "Dispatch worker started");

        let config = &self.ctx.config;
        let mut idle = config.min_idle_backoff;

        while !*shutdown.borrow() {
            let pause = match self.poll_once().await {
                Ok(CycleOutcome::Idle) => {
                    let pause = idle;
                    idle = (idle * 2).min(config.max_idle_backoff);
                    pause
                }
                Ok(_) => {
                    idle = config.min_idle_backoff;
                    continue;
                }
                Err(e) => {
                    error!(worker = %self.id, "Dispatch cycle failed: {}", e);
                    config.transient_retry
                }
            };

            if sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }

        info!(worker = %self.id, "Dispatch worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
