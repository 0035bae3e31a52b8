// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 锁存储实现
pub mod memory_lock_store;
pub mod redis_lock_store;
