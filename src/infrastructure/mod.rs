// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 领域层能力接口的具体实现：
/// - 缓存（cache）：Redis 客户端
/// - 数据库（database）：数据库连接与实体映射
/// - 锁（lock）：Redis 与内存锁存储
/// - 可观测性（observability）：指标记录
/// - 队列（queue）：Redis 与内存队列代理
/// - 仓库实现（repositories）：任务存储实现
pub mod cache;
pub mod database;
pub mod lock;
pub mod observability;
pub mod queue;
pub mod repositories;
