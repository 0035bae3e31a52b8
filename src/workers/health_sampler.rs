// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::queue::health_monitor::QueueHealthMonitor;
use crate::utils::errors::WorkerError;
use crate::workers::worker::{sleep_or_shutdown, Worker};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// 队列健康采样工作器
///
/// 按固定间隔调用监控器采样；监控器只读，不影响派发
pub struct HealthSampler {
    monitor: Arc<QueueHealthMonitor>,
    interval: Duration,
}

impl HealthSampler {
    pub fn new(monitor: Arc<QueueHealthMonitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }
}

#[async_trait]
impl Worker for HealthSampler {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(interval_secs = self.interval.as_secs(), "Queue health sampler started");

        loop {
            if let Err(e) = self.monitor.sample().await {
                warn!("Queue health sampling failed: {}", e);
            }
            if sleep_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "health-sampler"
    }
}
