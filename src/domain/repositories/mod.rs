// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 存储接口模块
///
/// 定义调度核心消费的外部能力接口，具体实现由基础设施层提供：
/// - 任务存储（task_store）：任务记录、执行记录与死信查询
/// - 锁存储（lock_store）：带 TTL 的原子条件写入
pub mod lock_store;
pub mod task_store;
