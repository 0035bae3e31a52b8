// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::circuit_breaker::CircuitSnapshot;
use crate::presentation::state::AppState;
use crate::queue::health_monitor::QueueHealthSnapshot;
use axum::{extract::Extension, Json};

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 各队列最近一次采样的健康快照
pub async fn queue_health(Extension(state): Extension<AppState>) -> Json<Vec<QueueHealthSnapshot>> {
    Json(state.monitor.snapshot())
}

/// 本进程内所有熔断器的状态
pub async fn circuit_breakers(Extension(state): Extension<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.breakers.snapshots())
}
