// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列代理实现
pub mod memory_broker;
pub mod redis_broker;
