// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::repositories::task_store::StoreError;
use crate::queue::scheduler::SchedulerError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<SchedulerError>() {
            return match err {
                SchedulerError::Store(store) => store_status(store),
                SchedulerError::TerminalTask { .. } => StatusCode::CONFLICT,
                SchedulerError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SchedulerError::Domain(_) => StatusCode::CONFLICT,
            };
        }

        match self.0.downcast_ref::<StoreError>() {
            Some(err) => store_status(err),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } | StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::Database(_) | StoreError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
