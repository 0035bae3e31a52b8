// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::task_store::TaskStore;
use crate::engines::circuit_breaker::CircuitBreakerRegistry;
use crate::queue::scheduler::Scheduler;
use crate::utils::clock::{to_chrono, Clock};
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_shutdown, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 对账工作器配置
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// 运行间隔
    pub interval: Duration,
    /// 到期超过该时长仍为 Pending 的任务视为丢失了队列条目
    pub stale_threshold: Duration,
    /// 一次尝试的锁最长可能存活的时间（锁 TTL 加回调超时上限）
    ///
    /// 尝试开始超过 `lock_horizon + stale_threshold` 仍为 Dispatched 的任务
    /// 视为持有者已崩溃且条目已丢失
    pub lock_horizon: Duration,
    /// 每轮最多重新入队的任务数
    pub batch: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(300),
            lock_horizon: Duration::from_secs(150),
            batch: 500,
        }
    }
}

/// 单轮对账的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 重新入队的 Pending 任务数
    pub requeued: usize,
    /// 重新入队的遗弃 Dispatched 任务数
    pub recovered_dispatched: usize,
    /// 重新入队失败的任务数
    pub failed: usize,
    /// 回收的空闲熔断器数
    pub evicted_breakers: usize,
}

/// 对账工作器
///
/// 任务存储是事实来源：代理写入失败或条目丢失时，由该工作器根据
/// 任务记录重新派生条目。同时负责回收空闲熔断器。
pub struct ReconcileWorker {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<Scheduler>,
    breakers: CircuitBreakerRegistry,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<Scheduler>,
        breakers: CircuitBreakerRegistry,
        clock: Arc<dyn Clock>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            breakers,
            clock,
            config,
        }
    }

    /// 执行一轮对账
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, WorkerError> {
        let mut report = ReconcileReport::default();

        let now = self.clock.now();
        let stale_threshold = to_chrono(self.config.stale_threshold);

        let stale = self
            .store
            .list_stale_pending(now - stale_threshold, self.config.batch)
            .await?;
        for task in &stale {
            match self.scheduler.enqueue(task).await {
                Ok(_) => report.requeued += 1,
                Err(e) => {
                    warn!(task_id = %task.id, "Failed to re-enqueue stale task: {}", e);
                    report.failed += 1;
                }
            }
        }

        // 崩溃的持有者锁已过期，而它的条目可能已被竞争方确认丢弃
        let executed_before = now - to_chrono(self.config.lock_horizon) - stale_threshold;
        let abandoned = self
            .store
            .list_stale_dispatched(executed_before, self.config.batch)
            .await?;
        for task in &abandoned {
            match self.scheduler.enqueue(task).await {
                Ok(_) => report.recovered_dispatched += 1,
                Err(e) => {
                    warn!(task_id = %task.id, "Failed to re-enqueue abandoned task: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.evicted_breakers = self.breakers.evict_idle();

        if report.requeued > 0 || report.recovered_dispatched > 0 || report.failed > 0 {
            info!(
                requeued = report.requeued,
                recovered_dispatched = report.recovered_dispatched,
                failed = report.failed,
                "Re-enqueued stale tasks"
            );
        }
        debug!(evicted = report.evicted_breakers, "Reconcile pass finished");
        Ok(report)
    }
}

#[async_trait]
impl Worker for ReconcileWorker {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!("Reconcile worker started");

        loop {
            if let Err(e) = self.reconcile_once().await {
                error!("Reconcile pass failed: {}", e);
            }
            if sleep_or_shutdown(self.config.interval, &mut shutdown).await {
                break;
            }
        }

        info!("Reconcile worker stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "reconcile"
    }
}
