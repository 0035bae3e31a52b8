// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库实现模块
///
/// 任务存储接口的内存实现与 SeaORM 数据库实现
pub mod memory_task_store;
pub mod task_store_impl;
