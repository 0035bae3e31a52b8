// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理调度引擎的配置设置，包括后端选择、派发、重试、熔断与连接池等配置
pub mod settings;
