// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::presentation::handlers::{dead_letter_handler, health_handler};
use crate::presentation::middleware::in_flight::track_in_flight;
use crate::presentation::state::AppState;
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// 创建运维路由
///
/// # 参数
///
/// * `state` - 共享服务句柄
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_handler::health_check))
        .route("/v1/version", get(version));

    let operator_routes = Router::new()
        .route("/v1/queues/health", get(health_handler::queue_health))
        .route("/v1/circuit-breakers", get(health_handler::circuit_breakers))
        .route(
            "/v1/dead-letters",
            get(dead_letter_handler::list_dead_letters),
        )
        .route(
            "/v1/dead-letters/recover",
            post(dead_letter_handler::recover_dead_letters),
        )
        .route(
            "/v1/dead-letters/{id}/recover",
            post(dead_letter_handler::recover_dead_letter),
        )
        .layer(Extension(state));

    Router::new()
        .merge(public_routes)
        .merge(operator_routes)
        .layer(axum::middleware::from_fn(track_in_flight))
        .layer(TraceLayer::new_for_http())
}

/// 版本信息端点
///
/// # 返回值
///
/// 返回应用版本号
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
