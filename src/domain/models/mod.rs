// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 该模块定义了调度核心的数据实体：
/// - 任务（task）：待完成的回调义务及其生命周期
/// - 执行记录（execution_record）：每次尝试的不可变记录
/// - 回调结果（outcome）：单次尝试结果的带标签变体
/// - 锁（lock）：任务级互斥锁
/// - 队列条目（queue_entry）：代理中的投递单元
pub mod execution_record;
pub mod lock;
pub mod outcome;
pub mod queue_entry;
pub mod task;
