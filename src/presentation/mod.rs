// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 运维 HTTP 接口：健康检查、队列健康、熔断器快照与死信管理
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;
