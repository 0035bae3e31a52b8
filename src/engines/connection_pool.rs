// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::infrastructure::observability::metrics::{http_in_flight_dec, http_in_flight_inc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// 连接池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 每个主机最多保留的空闲连接
    pub max_idle_per_host: usize,
    /// 空闲连接保留时长
    pub idle_timeout: Duration,
    /// TCP keep-alive 间隔
    pub keep_alive: Duration,
    /// 连接建立超时
    pub connect_timeout: Duration,
    /// 全局并发请求上限
    pub max_concurrent_requests: usize,
    /// 单个目标并发请求上限
    pub max_concurrent_per_host: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            max_concurrent_requests: 256,
            max_concurrent_per_host: 32,
        }
    }
}

/// 连接池错误类型
#[derive(Error, Debug)]
pub enum PoolError {
    /// 构建 HTTP 客户端失败
    #[error("Failed to build http client: {0}")]
    Client(#[from] reqwest::Error),

    /// 等待并发许可超时
    #[error("Timed out waiting for a request slot to {0}")]
    Saturated(String),
}

/// 并发许可，持有期间计入在途请求
pub struct PoolPermit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        http_in_flight_dec();
    }
}

/// 连接池管理器
///
/// 所有 worker 共享一个 reqwest 客户端（按主机复用连接），
/// 以全局信号量和按目标的信号量限制在途请求数
#[derive(Clone, Debug)]
pub struct ConnectionPool {
    client: reqwest::Client,
    global: Arc<Semaphore>,
    per_host: Arc<DashMap<String, Arc<Semaphore>>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// 创建连接池
    ///
    /// # 参数
    ///
    /// * `config` - 连接池配置
    ///
    /// # 返回值
    ///
    /// * `Ok(ConnectionPool)` - 连接池实例
    /// * `Err(PoolError)` - 客户端构建失败
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .user_agent("dispatchrs/0.1")
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .tcp_keepalive(config.keep_alive)
            .connect_timeout(config.connect_timeout)
            // 3xx 交由分类器处理
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            global: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            per_host: Arc::new(DashMap::new()),
            config,
        })
    }

    /// 共享的 HTTP 客户端
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 获取并发许可
    ///
    /// 先获取全局许可再获取目标许可，总等待时间不超过 `wait`
    pub async fn acquire(&self, target: &str, wait: Duration) -> Result<PoolPermit, PoolError> {
        self.acquire_until(target, Instant::now() + wait).await
    }

    /// 获取并发许可，最迟等到 `deadline`
    pub async fn acquire_until(
        &self,
        target: &str,
        deadline: Instant,
    ) -> Result<PoolPermit, PoolError> {
        let host = self.host_semaphore(target);
        let acquire = async {
            let global = self.global.clone().acquire_owned().await;
            let host = host.acquire_owned().await;
            (global, host)
        };

        match tokio::time::timeout_at(deadline, acquire).await {
            Ok((Ok(global), Ok(host))) => {
                http_in_flight_inc();
                Ok(PoolPermit {
                    _global: global,
                    _host: host,
                })
            }
            _ => Err(PoolError::Saturated(target.to_string())),
        }
    }

    /// 当前可用的全局许可数
    pub fn available(&self) -> usize {
        self.global.available_permits()
    }

    fn host_semaphore(&self, target: &str) -> Arc<Semaphore> {
        self.per_host
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_concurrent_per_host.max(1))))
            .clone()
    }
}
