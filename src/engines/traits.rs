// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::execution_record::ExecutionRecord;
use crate::domain::models::outcome::CallbackOutcome;
use crate::domain::models::task::{CallbackTarget, Task, TemplateVars};
use crate::domain::repositories::task_store::StoreError;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// 执行器错误类型
///
/// 仅表示基础设施故障；回调本身的失败通过 `CallbackOutcome` 返回
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// 执行记录追加失败
    #[error("Failed to append execution record: {0}")]
    RecordAppend(#[from] StoreError),
}

/// 回调请求
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// 任务ID
    pub task_id: Uuid,
    /// 租户ID
    pub tenant_id: Uuid,
    /// 任务类型
    pub task_type: String,
    /// 本次尝试序号
    pub attempt: u32,
    /// 回调目标
    pub target: CallbackTarget,
    /// 渲染后的请求体
    pub body: Option<String>,
    /// 任务级超时，为空时使用默认值
    pub timeout: Option<Duration>,
    /// 追踪ID
    pub trace_id: String,
    /// 执行该尝试的 worker
    pub worker_id: String,
}

impl CallbackRequest {
    /// 从已派发的任务构建回调请求
    pub fn from_task(task: &Task, trace_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let body = task.callback.render_body(&TemplateVars {
            task_id: task.id,
            tenant_id: task.tenant_id,
            task_type: &task.task_type,
            attempt: task.current_attempt,
            trace_id: &trace_id,
        });

        Self {
            task_id: task.id,
            tenant_id: task.tenant_id,
            task_type: task.task_type.clone(),
            attempt: task.current_attempt,
            target: task.callback.clone(),
            body,
            timeout: task.timeout_secs.map(Duration::from_secs),
            trace_id,
            worker_id: worker_id.into(),
        }
    }

    /// 熔断器与连接池使用的目标键
    pub fn target_key(&self) -> String {
        self.target.target_key()
    }
}

/// 回调结果：结果分类及已追加的执行记录
#[derive(Debug, Clone)]
pub struct CallbackResult {
    pub outcome: CallbackOutcome,
    pub record: ExecutionRecord,
}

/// 回调调用特质
#[async_trait]
pub trait CallbackInvoker: Send + Sync {
    /// 执行一次回调尝试
    ///
    /// 无论结果如何，返回前都已追加一条执行记录
    async fn invoke(&self, request: &CallbackRequest) -> Result<CallbackResult, ExecutorError>;

    /// 执行器名称
    fn name(&self) -> &'static str;
}
