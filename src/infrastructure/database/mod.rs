// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 数据库模块
///
/// 连接池、启动时迁移，以及任务表与执行记录表的 SeaORM 实体
pub mod connection;
pub mod entities;
