// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// - 死信服务（dead_letter_service）：查询与恢复死信任务
/// - 锁管理器（lock_manager）：任务级互斥锁的获取、续期与释放
/// - 重试协调器（retry_coordinator）：根据回调结果推进任务状态机
pub mod dead_letter_service;
pub mod lock_manager;
pub mod retry_coordinator;
