// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::infrastructure::observability::metrics::{http_in_flight_dec, http_in_flight_inc};
use axum::{extract::Request, middleware::Next, response::Response};

/// 在途请求计数中间件
pub async fn track_in_flight(req: Request, next: Next) -> Response {
    http_in_flight_inc();
    let response = next.run(req).await;
    http_in_flight_dec();
    response
}
