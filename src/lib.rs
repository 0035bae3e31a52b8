// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 任务模型、存储接口与调度核心的领域服务
pub mod domain;

/// 引擎模块
///
/// 回调执行器、连接池、响应分类与熔断器
pub mod engines;

/// 基础设施模块
///
/// Redis、数据库、内存后端与指标导出
pub mod infrastructure;

/// 表示层模块
///
/// 运维 HTTP 接口
pub mod presentation;

/// 队列模块
///
/// 队列代理接口、调度器、加权选择与队列健康监控
pub mod queue;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作器模块
///
/// 派发、对账与工作器生命周期管理
pub mod workers;
