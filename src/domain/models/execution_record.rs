// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::{CallbackOutcome, OutcomeClass};

/// 执行记录
///
/// 每次尝试（无论结果如何）追加一条，追加后不可变。
/// `sequence` 由任务存储在追加时分配，同一任务内严格递增且无间隙。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub sequence: u64,
    pub attempt: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: OutcomeClass,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub trace_id: String,
}

/// 待追加的执行记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionRecord {
    pub task_id: Uuid,
    pub attempt: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: OutcomeClass,
    pub http_status: Option<u16>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub trace_id: String,
}

impl NewExecutionRecord {
    /// 从回调结果构建
    #[allow(clippy::too_many_arguments)]
    pub fn from_outcome(
        task_id: Uuid,
        attempt: u32,
        worker_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        outcome: &CallbackOutcome,
        response_body: Option<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            worker_id: worker_id.into(),
            started_at,
            duration_ms,
            outcome: outcome.class(),
            http_status: outcome.http_status(),
            error_message: outcome.error_message(),
            response_body,
            trace_id: trace_id.into(),
        }
    }

    /// 分配序号后转换为不可变记录
    pub fn into_record(self, sequence: u64) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            task_id: self.task_id,
            sequence,
            attempt: self.attempt,
            worker_id: self.worker_id,
            started_at: self.started_at,
            duration_ms: self.duration_ms,
            outcome: self.outcome,
            http_status: self.http_status,
            error_message: self.error_message,
            response_body: self.response_body,
            trace_id: self.trace_id,
        }
    }
}
