// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::errors::WorkerError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// Worker trait定义
///
/// 所有后台工作器都必须实现此trait。关闭信号置为 `true` 后，
/// 工作器完成当前周期即返回，不中断进行中的尝试。
#[async_trait]
pub trait Worker: Send + Sync {
    /// 运行工作器直到收到关闭信号
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError>;

    /// 获取工作器名称
    fn name(&self) -> &str;
}

/// 等待指定时长，关闭信号先到时提前返回
///
/// # 返回值
///
/// 收到关闭信号时返回 `true`
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
