// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::workers::dispatcher::{DispatchContext, DispatchWorker};
use crate::workers::worker::Worker;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 工作管理器
///
/// 持有所有后台工作器的句柄与共享的关闭信号。关闭时先广播信号，
/// 再等待每个工作器完成当前周期后退出。
pub struct WorkerManager {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 启动单个工作器
    pub fn spawn(&mut self, worker: Arc<dyn Worker>) {
        let shutdown = self.subscribe();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                error!(worker = worker.name(), "Worker exited with error: {}", e);
            }
        });
        self.handles.push(handle);
    }

    /// 启动派发工作进程
    ///
    /// # 参数
    ///
    /// * `ctx` - 派发工作器共享依赖
    /// * `count` - 要启动的工作进程数量
    /// * `node_id` - 节点标识，与序号组合为锁持有者
    pub fn start_dispatchers(&mut self, ctx: DispatchContext, count: usize, node_id: &str) {
        for index in 0..count {
            let worker = DispatchWorker::new(format!("{}-{}", node_id, index), ctx.clone());
            self.spawn(Arc::new(worker));
        }
        info!(count, "Dispatch workers started");
    }

    /// 正在运行的工作器数量
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 等待关闭信号并关闭工作进程
    pub async fn wait_for_shutdown(self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
        self.shutdown().await;
    }

    /// 广播关闭信号并等待所有工作进程退出
    pub async fn shutdown(self) {
        info!("Shutting down workers...");
        let _ = self.shutdown_tx.send(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }

        info!("Workers shut down successfully");
    }
}
