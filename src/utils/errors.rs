// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::lock_store::LockStoreError;
use crate::domain::repositories::task_store::StoreError;
use crate::domain::services::lock_manager::LockError;
use crate::domain::services::retry_coordinator::CoordinatorError;
use crate::engines::traits::ExecutorError;
use crate::queue::broker::QueueError;
use crate::queue::scheduler::SchedulerError;
use thiserror::Error;

/// Worker错误类型
///
/// 仅承载基础设施错误；任务级失败通过 `CallbackOutcome` 传递
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("队列错误: {0}")]
    Queue(#[from] QueueError),

    #[error("任务存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("锁存储错误: {0}")]
    LockStore(#[from] LockStoreError),

    #[error("锁错误: {0}")]
    Lock(#[from] LockError),

    #[error("调度错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("重试协调错误: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("回调执行错误: {0}")]
    Executor(#[from] ExecutorError),

    #[error("内部错误: {0}")]
    InternalError(String),
}
