// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 队列代理接口、调度器、加权出队选择与队列健康监控
pub mod broker;
pub mod health_monitor;
pub mod scheduler;
pub mod topology;
pub mod weighted_selector;
