// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// - 派发工作器（dispatcher）：出队、加锁、执行回调并推进任务状态
/// - 对账工作器（reconcile_worker）：重新派生丢失的队列条目并回收熔断器
/// - 健康采样（health_sampler）：周期性采样队列健康度
/// - 工作管理器（manager）：生命周期与优雅关闭
pub mod dispatcher;
pub mod health_sampler;
pub mod manager;
pub mod reconcile_worker;
pub mod worker;

pub use worker::Worker;
