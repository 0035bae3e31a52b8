// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 端到端测试模块
///
/// 真实时钟、多个派发工作器与运维 HTTP 接口协同工作
pub mod dispatch_workflow_test;
