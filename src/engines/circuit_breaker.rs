// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::infrastructure::observability::metrics::{record_breaker_rejected, set_breaker_status};
use crate::utils::clock::{to_chrono, until, Clock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 连续失败阈值
    pub failure_threshold: u32,
    /// 打开后的冷却时间
    pub cooldown: Duration,
    /// 失败时间窗口，相邻两次失败间隔超过该窗口时重新计数
    pub failure_window: Duration,
    /// 空闲多久后可被回收
    pub idle_eviction: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            idle_eviction: Duration::from_secs(3600),
        }
    }
}

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// 关闭状态
    Closed,
    /// 打开状态
    Open,
    /// 半开状态
    HalfOpen,
}

impl Status {
    fn metric_value(&self) -> f64 {
        match self {
            Status::Closed => 0.0,
            Status::Open => 1.0,
            Status::HalfOpen => 0.5,
        }
    }
}

/// 熔断器状态
#[derive(Clone, Debug)]
struct CircuitState {
    status: Status,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    last_activity: DateTime<Utc>,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
}

impl CircuitState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: Status::Closed,
            consecutive_failures: 0,
            last_failure: None,
            cooldown_until: None,
            trial_in_flight: false,
            last_activity: now,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

/// 熔断器快照
#[derive(Clone, Debug, Serialize)]
pub struct CircuitSnapshot {
    pub target: String,
    pub status: Status,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// 熔断器打开，调用被短路
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("Circuit open for {target}, retry after {retry_after:?}")]
pub struct CircuitOpen {
    pub target: String,
    pub retry_after: Duration,
}

/// 熔断器注册表
///
/// 按回调目标惰性创建熔断器，所有 worker 共享同一注册表。
/// 每个目标的计数在各自的互斥锁下做读改写。
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    states: Arc<DashMap<String, Arc<Mutex<CircuitState>>>>,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// 创建新的熔断器注册表
    ///
    /// # 参数
    ///
    /// * `config` - 熔断器配置
    /// * `clock` - 时钟
    pub fn new(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            config,
            clock,
        }
    }

    /// 配置
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn state_for(&self, target: &str) -> Arc<Mutex<CircuitState>> {
        let now = self.clock.now();
        self.states
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new(now))))
            .clone()
    }

    /// 请求调用许可
    ///
    /// # 返回值
    ///
    /// * `Ok(BreakerPermit)` - 允许调用；调用结束后必须以成功或失败结算
    /// * `Err(CircuitOpen)` - 熔断器打开或半开试探已占用，不得发出网络请求
    pub fn try_acquire(&self, target: &str) -> Result<BreakerPermit, CircuitOpen> {
        let shared = self.state_for(target);
        let now = self.clock.now();

        let trial = {
            let mut state = shared.lock();
            state.last_activity = now;

            let status = state.status;
            match status {
                Status::Closed => false,
                Status::Open => {
                    let cooldown_until = state.cooldown_until.unwrap_or(now);
                    if now < cooldown_until {
                        drop(state);
                        record_breaker_rejected(target);
                        return Err(CircuitOpen {
                            target: target.to_string(),
                            retry_after: until(now, cooldown_until),
                        });
                    }
                    state.status = Status::HalfOpen;
                    state.trial_in_flight = true;
                    set_breaker_status(target, Status::HalfOpen.metric_value());
                    info!(breaker = %target, "Circuit half-open, admitting trial call");
                    true
                }
                Status::HalfOpen => {
                    if state.trial_in_flight {
                        drop(state);
                        record_breaker_rejected(target);
                        return Err(CircuitOpen {
                            target: target.to_string(),
                            retry_after: self.config.cooldown,
                        });
                    }
                    state.trial_in_flight = true;
                    true
                }
            }
        };

        Ok(BreakerPermit {
            state: shared,
            target: target.to_string(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            trial,
            settled: false,
        })
    }

    /// 获取单个目标的快照
    pub fn snapshot(&self, target: &str) -> Option<CircuitSnapshot> {
        let shared = self.states.get(target)?.clone();
        let state = shared.lock();
        Some(Self::to_snapshot(target, &state))
    }

    /// 获取所有目标的快照，按目标排序
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let entries: Vec<(String, Arc<Mutex<CircuitState>>)> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut snapshots: Vec<CircuitSnapshot> = entries
            .iter()
            .map(|(target, shared)| Self::to_snapshot(target, &shared.lock()))
            .collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }

    /// 回收空闲的已关闭熔断器
    ///
    /// # 返回值
    ///
    /// 被回收的熔断器数量
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let idle = to_chrono(self.config.idle_eviction);
        let before = self.states.len();

        self.states.retain(|_, shared| {
            let state = shared.lock();
            let evictable = state.status == Status::Closed
                && state.consecutive_failures == 0
                && !state.trial_in_flight
                && now - state.last_activity >= idle;
            !evictable
        });

        before.saturating_sub(self.states.len())
    }

    fn to_snapshot(target: &str, state: &CircuitState) -> CircuitSnapshot {
        CircuitSnapshot {
            target: target.to_string(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            last_failure_at: state.last_failure,
            cooldown_until: state.cooldown_until,
            total_requests: state.total_requests,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
        }
    }
}

/// 调用许可
///
/// 未结算即被丢弃时只释放半开试探名额，不计入成功或失败
pub struct BreakerPermit {
    state: Arc<Mutex<CircuitState>>,
    target: String,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// 是否为半开试探调用
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// 记录成功
    pub fn record_success(mut self) {
        self.settled = true;
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.total_successes += 1;

        let status = state.status;
        match status {
            Status::HalfOpen if self.trial => {
                state.status = Status::Closed;
                state.consecutive_failures = 0;
                state.cooldown_until = None;
                state.trial_in_flight = false;
                set_breaker_status(&self.target, Status::Closed.metric_value());
                info!(breaker = %self.target, "Circuit closed after successful trial");
            }
            Status::Closed => {
                state.consecutive_failures = 0;
            }
            // 打开前发出的请求迟到的成功不改变状态
            _ => {}
        }
    }

    /// 记录失败
    pub fn record_failure(mut self) {
        self.settled = true;
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.total_failures += 1;

        let status = state.status;
        match status {
            Status::Closed => {
                let window = to_chrono(self.config.failure_window);
                if state.last_failure.is_some_and(|last| now - last > window) {
                    state.consecutive_failures = 0;
                }
                state.consecutive_failures += 1;
                state.last_failure = Some(now);

                if state.consecutive_failures >= self.config.failure_threshold {
                    state.status = Status::Open;
                    state.cooldown_until = Some(now + to_chrono(self.config.cooldown));
                    set_breaker_status(&self.target, Status::Open.metric_value());
                    warn!(
                        breaker = %self.target,
                        failures = state.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            Status::HalfOpen if self.trial => {
                state.consecutive_failures += 1;
                state.last_failure = Some(now);
                state.status = Status::Open;
                state.trial_in_flight = false;
                state.cooldown_until = Some(now + to_chrono(self.config.cooldown));
                set_breaker_status(&self.target, Status::Open.metric_value());
                warn!(breaker = %self.target, "Trial call failed, circuit re-opened");
            }
            _ => {
                state.consecutive_failures += 1;
                state.last_failure = Some(now);
            }
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            let mut state = self.state.lock();
            if state.status == Status::HalfOpen {
                state.trial_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
#[path = "circuit_breaker_test.rs"]
mod tests;
