// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库实体模块
///
/// 调度任务与执行记录的 SeaORM 实体
pub mod dispatch_execution_record;
pub mod dispatch_task;
