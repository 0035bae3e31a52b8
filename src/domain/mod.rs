// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// 该模块包含调度核心的业务逻辑，包括：
/// - 领域模型（models）：任务、执行记录、锁与队列条目
/// - 存储接口（repositories）：任务存储与锁存储的抽象
/// - 服务（services）：锁管理、重试协调与死信处理
pub mod models;
pub mod repositories;
pub mod services;
