// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 退避策略
///
/// 将尝试次数映射为下一次尝试前的等待时长
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BackoffStrategy {
    /// 固定间隔
    Fixed {
        /// 每次重试的间隔
        interval: Duration,
    },
    /// 线性增长：`initial + increment * (attempt - 1)`
    Linear {
        /// 首次重试间隔
        initial: Duration,
        /// 每次递增量
        increment: Duration,
    },
    /// 指数增长：`initial * multiplier^(attempt - 1)`，不超过 `ceiling`
    Exponential {
        /// 首次重试间隔
        initial: Duration,
        /// 退避乘数
        multiplier: f64,
        /// 上限
        ceiling: Duration,
    },
    /// 显式间隔列表，超出列表长度时沿用最后一个间隔
    Intervals {
        /// 间隔列表
        intervals: Vec<Duration>,
    },
}

/// 抖动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// 不加抖动
    #[default]
    None,
    /// 完全抖动：`random(0, delay)`
    Full,
    /// 等额抖动：`delay / 2 + random(0, delay / 2)`
    Equal,
    /// 去相关抖动：`random(base, previous * 3)`
    Decorrelated,
}

/// 退避策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// 基础策略
    pub strategy: BackoffStrategy,
    /// 抖动模式
    pub jitter: Jitter,
    /// 抖动之后的绝对上限（可选）
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl BackoffPolicy {
    /// 创建标准退避策略：1分钟起步，指数增长，上限1小时，等额抖动
    pub fn standard() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                initial: Duration::from_secs(60),
                multiplier: 2.0,
                ceiling: Duration::from_secs(3600),
            },
            jitter: Jitter::Equal,
            max_delay: None,
        }
    }

    /// 创建快速退避策略（更短的退避时间）
    pub fn fast() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                multiplier: 1.5,
                ceiling: Duration::from_secs(10),
            },
            jitter: Jitter::Full,
            max_delay: None,
        }
    }

    /// 使用固定间隔列表创建策略
    pub fn intervals(intervals: Vec<Duration>, jitter: Jitter) -> Self {
        Self {
            strategy: BackoffStrategy::Intervals { intervals },
            jitter,
            max_delay: None,
        }
    }

    /// 计算第 `attempt` 次失败之后的基础退避时长（不含抖动）
    ///
    /// # 参数
    ///
    /// * `attempt` - 已失败的尝试序号，从1开始
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        let delay = match &self.strategy {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(attempt - 1))
            }
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                ceiling,
            } => {
                let exponent = (attempt - 1).min(63) as i32;
                let secs = initial.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                let capped = secs.min(ceiling.as_secs_f64());
                Duration::from_secs_f64(capped.max(0.0))
            }
            BackoffStrategy::Intervals { intervals } => intervals
                .get(attempt as usize - 1)
                .or_else(|| intervals.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        };

        self.cap(delay)
    }

    /// 计算第 `attempt` 次失败之后的退避时长（含抖动）
    ///
    /// 去相关抖动需要上一次的延迟；重试状态是持久化的而不是进程内的，
    /// 因此这里使用上一次尝试的基础延迟作为参照
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let base_secs = base.as_secs_f64();

        let jittered = match self.jitter {
            Jitter::None => base_secs,
            Jitter::Full => rand::random_range(0.0..=base_secs),
            Jitter::Equal => {
                let half = base_secs / 2.0;
                half + rand::random_range(0.0..=half)
            }
            Jitter::Decorrelated => {
                let floor = self.base_delay(1).as_secs_f64();
                let previous = if attempt > 1 {
                    self.base_delay(attempt - 1).as_secs_f64()
                } else {
                    floor
                };
                let upper = (previous * 3.0).max(floor);
                rand::random_range(floor..=upper)
            }
        };

        self.cap(Duration::from_secs_f64(jittered.max(0.0)))
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
