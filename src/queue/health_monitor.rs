// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::infrastructure::observability::metrics::{
    set_queue_depth, set_queue_health, set_queue_oldest_age,
};
use crate::queue::broker::{QueueBroker, QueueError};
use crate::utils::clock::{to_chrono, Clock};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 队列健康等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    /// 健康
    Healthy,
    /// 降级
    Degraded,
    /// 严重
    Critical,
}

impl QueueHealth {
    fn metric_value(&self) -> f64 {
        match self {
            QueueHealth::Healthy => 0.0,
            QueueHealth::Degraded => 1.0,
            QueueHealth::Critical => 2.0,
        }
    }
}

/// 健康分级阈值
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// 积压数降级阈值
    pub degraded_pending: u64,
    /// 积压数严重阈值
    pub critical_pending: u64,
    /// 最老就绪条目等待时长降级阈值
    pub degraded_age: Duration,
    /// 最老就绪条目等待时长严重阈值
    pub critical_age: Duration,
    /// 错误率降级阈值
    pub degraded_error_rate: f64,
    /// 错误率严重阈值
    pub critical_error_rate: f64,
    /// 窗口内至少多少个结果才计算错误率
    pub min_samples: usize,
    /// 错误率统计窗口
    pub window: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_pending: 1_000,
            critical_pending: 10_000,
            degraded_age: Duration::from_secs(60),
            critical_age: Duration::from_secs(300),
            degraded_error_rate: 0.1,
            critical_error_rate: 0.5,
            min_samples: 20,
            window: Duration::from_secs(300),
        }
    }
}

impl HealthThresholds {
    /// 按三个维度中最差的一个分级
    pub fn classify(&self, pending: u64, oldest_age: Duration, error_rate: Option<f64>) -> QueueHealth {
        let by_pending = tier(pending >= self.critical_pending, pending >= self.degraded_pending);
        let by_age = tier(oldest_age >= self.critical_age, oldest_age >= self.degraded_age);
        let by_errors = match error_rate {
            Some(rate) => tier(
                rate >= self.critical_error_rate,
                rate >= self.degraded_error_rate,
            ),
            None => QueueHealth::Healthy,
        };
        by_pending.max(by_age).max(by_errors)
    }
}

fn tier(critical: bool, degraded: bool) -> QueueHealth {
    if critical {
        QueueHealth::Critical
    } else if degraded {
        QueueHealth::Degraded
    } else {
        QueueHealth::Healthy
    }
}

/// 单个队列的健康快照
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealthSnapshot {
    pub queue: String,
    pub health: QueueHealth,
    pub ready: u64,
    pub delayed: u64,
    pub in_flight: u64,
    pub oldest_ready_age_secs: u64,
    /// 窗口内样本不足时为空
    pub error_rate: Option<f64>,
    pub samples: usize,
    pub sampled_at: DateTime<Utc>,
}

/// 队列健康监控器
///
/// 只读观察者：采样深度、最老条目等待时长和近期错误率并分级，
/// 不改变派发行为
pub struct QueueHealthMonitor {
    broker: Arc<dyn QueueBroker>,
    clock: Arc<dyn Clock>,
    thresholds: HealthThresholds,
    queues: Vec<String>,
    outcomes: Mutex<HashMap<String, VecDeque<(DateTime<Utc>, bool)>>>,
    snapshots: RwLock<HashMap<String, QueueHealthSnapshot>>,
}

impl QueueHealthMonitor {
    /// 创建新的监控器
    ///
    /// # 参数
    ///
    /// * `broker` - 队列代理
    /// * `clock` - 时钟
    /// * `thresholds` - 分级阈值
    /// * `queues` - 需要采样的队列
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        clock: Arc<dyn Clock>,
        thresholds: HealthThresholds,
        queues: Vec<String>,
    ) -> Self {
        Self {
            broker,
            clock,
            thresholds,
            queues,
            outcomes: Mutex::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// 记录一次尝试的结果
    pub fn record_outcome(&self, queue: &str, success: bool) {
        let now = self.clock.now();
        let mut outcomes = self.outcomes.lock();
        let window = outcomes.entry(queue.to_string()).or_default();
        window.push_back((now, success));
        prune(window, now - to_chrono(self.thresholds.window));
    }

    /// 窗口内的错误率与样本数
    fn error_rate(&self, queue: &str, now: DateTime<Utc>) -> (Option<f64>, usize) {
        let mut outcomes = self.outcomes.lock();
        let Some(window) = outcomes.get_mut(queue) else {
            return (None, 0);
        };
        prune(window, now - to_chrono(self.thresholds.window));

        let samples = window.len();
        if samples == 0 || samples < self.thresholds.min_samples {
            return (None, samples);
        }
        let failures = window.iter().filter(|(_, ok)| !ok).count();
        (Some(failures as f64 / samples as f64), samples)
    }

    /// 采样所有队列并更新快照与指标
    ///
    /// 单个队列采样失败不影响其他队列，返回最后一个错误
    pub async fn sample(&self) -> Result<Vec<QueueHealthSnapshot>, QueueError> {
        let mut sampled = Vec::with_capacity(self.queues.len());
        let mut last_error = None;

        for queue in &self.queues {
            let stats = match self.broker.stats(queue).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(queue = %queue, "Failed to sample queue: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            let now = self.clock.now();
            let (error_rate, samples) = self.error_rate(queue, now);
            let health =
                self.thresholds
                    .classify(stats.pending(), stats.oldest_ready_age, error_rate);

            set_queue_depth(queue, stats.pending());
            set_queue_oldest_age(queue, stats.oldest_ready_age);
            set_queue_health(queue, health.metric_value());

            let snapshot = QueueHealthSnapshot {
                queue: queue.clone(),
                health,
                ready: stats.ready,
                delayed: stats.delayed,
                in_flight: stats.in_flight,
                oldest_ready_age_secs: stats.oldest_ready_age.as_secs(),
                error_rate,
                samples,
                sampled_at: now,
            };

            let previous = self
                .snapshots
                .write()
                .insert(queue.clone(), snapshot.clone())
                .map(|s| s.health);
            if previous.is_some_and(|p| p != health) {
                warn!(queue = %queue, health = ?health, "Queue health changed");
            }
            debug!(queue = %queue, pending = stats.pending(), health = ?health, "Queue sampled");
            sampled.push(snapshot);
        }

        match last_error {
            Some(e) if sampled.is_empty() => Err(e),
            _ => Ok(sampled),
        }
    }

    /// 最近一次采样的快照，按队列名排序
    pub fn snapshot(&self) -> Vec<QueueHealthSnapshot> {
        let mut snapshots: Vec<QueueHealthSnapshot> =
            self.snapshots.read().values().cloned().collect();
        snapshots.sort_by(|a, b| a.queue.cmp(&b.queue));
        snapshots
    }

    /// 单个队列的健康等级；尚未采样时为空
    pub fn health_of(&self, queue: &str) -> Option<QueueHealth> {
        self.snapshots.read().get(queue).map(|s| s.health)
    }
}

fn prune(window: &mut VecDeque<(DateTime<Utc>, bool)>, cutoff: DateTime<Utc>) {
    while window.front().is_some_and(|(at, _)| *at < cutoff) {
        window.pop_front();
    }
}
