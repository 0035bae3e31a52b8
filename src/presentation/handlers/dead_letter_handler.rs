// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{DeadLetterReason, Task};
use crate::domain::repositories::task_store::DeadLetterFilter;
use crate::domain::services::dead_letter_service::RecoveryReport;
use crate::presentation::errors::AppError;
use crate::presentation::state::AppState;
use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// 死信查询参数
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeadLetterQuery {
    pub tenant_id: Option<Uuid>,
    pub task_type: Option<String>,
    pub reason: Option<DeadLetterReason>,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl From<DeadLetterQuery> for DeadLetterFilter {
    fn from(q: DeadLetterQuery) -> Self {
        DeadLetterFilter {
            tenant_id: q.tenant_id,
            task_type: q.task_type,
            reason: q.reason,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

/// 查询死信任务
///
/// # 参数
///
/// * `query` - 租户、任务类型、原因过滤及分页
///
/// # 返回值
///
/// 按完成时间倒序的死信任务列表
pub async fn list_dead_letters(
    Extension(state): Extension<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = state.dead_letters.list(&query.into()).await?;
    Ok(Json(tasks))
}

/// 恢复单个死信任务
pub async fn recover_dead_letter(
    Extension(state): Extension<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    info!(task_id = %id, "Dead-letter recovery requested");
    let task = state.dead_letters.recover(id).await?;
    Ok(Json(task))
}

/// 按条件批量恢复死信任务
///
/// 过滤条件与查询接口相同；不带条件时恢复第一页（默认 100 条）
pub async fn recover_dead_letters(
    Extension(state): Extension<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<RecoveryReport>, AppError> {
    let report = state.dead_letters.recover_batch(&query.into()).await?;
    Ok(Json(report))
}
