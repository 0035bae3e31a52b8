// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::utils::clock::to_chrono;

/// 回调任务实体
///
/// 表示一项必须最终触发 HTTP 回调的工作单元。任务记录由外部任务存储持有，
/// 调度核心只通过任务存储接口修改状态与尝试次数字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符
    pub id: Uuid,
    /// 所属租户ID
    pub tenant_id: Uuid,
    /// 任务类型，用于查找类型级默认配置以及指标标签
    pub task_type: String,
    /// 回调目标
    pub callback: CallbackTarget,
    /// 优先级层级
    pub priority: Priority,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 重试间隔列表（秒），第 n 次失败后等待 `retry_intervals[n - 1]`
    pub retry_intervals: Vec<u64>,
    /// 单次回调超时（秒），为空时使用执行器默认值
    pub timeout_secs: Option<u64>,
    /// 已开始的尝试次数
    pub current_attempt: u32,
    /// 生命周期状态
    pub status: TaskStatus,
    /// 计划执行时间
    pub scheduled_at: DateTime<Utc>,
    /// 下一次执行时间（重试时设置）
    pub next_execute_at: Option<DateTime<Utc>>,
    /// 最近一次尝试开始时间
    pub executed_at: Option<DateTime<Utc>>,
    /// 进入终态的时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 过期时间，超过后不再执行
    pub expires_at: Option<DateTime<Utc>>,
    /// 最近一次错误信息
    pub last_error: Option<String>,
    /// 死信原因，仅在进入死信集合时设置
    pub dead_letter_reason: Option<DeadLetterReason>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

/// 任务类型级默认配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefaults {
    pub max_attempts: u32,
    pub retry_intervals: Vec<u64>,
    pub timeout_secs: Option<u64>,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_intervals: vec![60, 300, 900],
            timeout_secs: None,
        }
    }
}

/// 回调目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackTarget {
    /// 回调地址
    pub url: String,
    /// HTTP 方法
    #[serde(default)]
    pub method: HttpMethod,
    /// 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 请求体模板，支持 `{{task_id}}` 等占位符
    #[serde(default)]
    pub body_template: Option<String>,
    /// 显式目标标识；为空时按主机聚合熔断器
    #[serde(default)]
    pub target_id: Option<String>,
}

/// 模板渲染变量
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub task_id: Uuid,
    pub tenant_id: Uuid,
    pub task_type: &'a str,
    pub attempt: u32,
    pub trace_id: &'a str,
}

impl CallbackTarget {
    /// 创建 POST 回调目标
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: HashMap::new(),
            body_template: None,
            target_id: None,
        }
    }

    /// 熔断器与连接池使用的目标键
    ///
    /// 优先使用显式 `target_id`，否则为 `host:port`
    pub fn target_key(&self) -> String {
        if let Some(id) = &self.target_id {
            return id.clone();
        }

        match url::Url::parse(&self.url) {
            Ok(parsed) => {
                let host = parsed.host_str().unwrap_or_default();
                match parsed.port_or_known_default() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }
            }
            Err(_) => self.url.clone(),
        }
    }

    /// 渲染请求体模板
    pub fn render_body(&self, vars: &TemplateVars<'_>) -> Option<String> {
        self.body_template.as_ref().map(|template| {
            template
                .replace("{{task_id}}", &vars.task_id.to_string())
                .replace("{{tenant_id}}", &vars.tenant_id.to_string())
                .replace("{{task_type}}", vars.task_type)
                .replace("{{attempt}}", &vars.attempt.to_string())
                .replace("{{trace_id}}", vars.trace_id)
        })
    }
}

/// 回调使用的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(DomainError::ValidationError(format!(
                "unsupported http method: {}",
                other
            ))),
        }
    }
}

/// 优先级层级
///
/// 高优先级队列只是获得更多出队机会，而不是严格排在低优先级之前
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// 所有层级，按优先级从高到低排列
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// 默认出队权重
    pub fn default_weight(&self) -> u32 {
        match self {
            Priority::Critical => 6,
            Priority::High => 4,
            Priority::Normal => 3,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(DomainError::ValidationError(format!(
                "unknown priority: {}",
                other
            ))),
        }
    }
}

/// 任务状态枚举
///
/// 状态转换流程：
/// Pending → Dispatched → Succeeded/Failed/Cancelled/Expired，
/// 重试时 Dispatched → Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待执行
    #[default]
    Pending,
    /// 已派发，正在执行一次尝试
    Dispatched,
    /// 回调成功
    Succeeded,
    /// 永久失败（死信）
    Failed,
    /// 已取消
    Cancelled,
    /// 已过期
    Expired,
}

impl TaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Expired
        )
    }

    /// 调度引擎内部允许的状态转换
    ///
    /// `Dispatched → Dispatched` 用于重新执行被崩溃 worker 遗弃的尝试。
    /// 死信恢复（`Failed → Pending`）是运维操作，不在此列。
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Dispatched | Failed | Cancelled | Expired) => true,
            (Dispatched, Pending | Dispatched | Succeeded | Failed | Cancelled | Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "dispatched" => Ok(TaskStatus::Dispatched),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "expired" => Ok(TaskStatus::Expired),
            other => Err(DomainError::ValidationError(format!(
                "unknown task status: {}",
                other
            ))),
        }
    }
}

/// 死信原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// 可重试失败耗尽了所有尝试
    RetriesExhausted,
    /// 不可重试失败
    NonRetryable,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeadLetterReason::RetriesExhausted => write!(f, "retries_exhausted"),
            DeadLetterReason::NonRetryable => write!(f, "non_retryable"),
        }
    }
}

impl FromStr for DeadLetterReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retries_exhausted" => Ok(DeadLetterReason::RetriesExhausted),
            "non_retryable" => Ok(DeadLetterReason::NonRetryable),
            other => Err(DomainError::ValidationError(format!(
                "unknown dead letter reason: {}",
                other
            ))),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// 尝试次数已用尽
    #[error("Attempts exhausted: {current} of {max}")]
    AttemptsExhausted { current: u32, max: u32 },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// 通过任务存储 `UpdateTaskStatus` 写入的字段集合
///
/// `expected_status` 为比较并设置守卫：存储中的当前状态不一致时写入失败
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub current_attempt: u32,
    pub next_execute_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_letter_reason: Option<DeadLetterReason>,
    pub updated_at: DateTime<Utc>,
    pub expected_status: Option<TaskStatus>,
}

impl TaskUpdate {
    /// 从任务的当前字段构建更新
    pub fn from_task(task: &Task) -> Self {
        Self {
            status: task.status,
            current_attempt: task.current_attempt,
            next_execute_at: task.next_execute_at,
            executed_at: task.executed_at,
            completed_at: task.completed_at,
            last_error: task.last_error.clone(),
            dead_letter_reason: task.dead_letter_reason,
            updated_at: task.updated_at,
            expected_status: None,
        }
    }

    /// 设置比较并设置守卫
    pub fn expecting(mut self, status: TaskStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    /// 将更新应用到任务
    pub fn apply_to(&self, task: &mut Task) {
        task.status = self.status;
        task.current_attempt = self.current_attempt;
        task.next_execute_at = self.next_execute_at;
        task.executed_at = self.executed_at;
        task.completed_at = self.completed_at;
        task.last_error = self.last_error.clone();
        task.dead_letter_reason = self.dead_letter_reason;
        task.updated_at = self.updated_at;
    }
}

impl Task {
    /// 创建一个新的任务
    ///
    /// # 参数
    ///
    /// * `tenant_id` - 所属租户ID
    /// * `task_type` - 任务类型
    /// * `callback` - 回调目标
    /// * `defaults` - 任务类型级默认配置
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 返回立即可执行、普通优先级的新任务
    pub fn new(
        tenant_id: Uuid,
        task_type: impl Into<String>,
        callback: CallbackTarget,
        defaults: &TaskDefaults,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            task_type: task_type.into(),
            callback,
            priority: Priority::default(),
            max_attempts: defaults.max_attempts.max(1),
            retry_intervals: defaults.retry_intervals.clone(),
            timeout_secs: defaults.timeout_secs,
            current_attempt: 0,
            status: TaskStatus::Pending,
            scheduled_at: now,
            next_execute_at: None,
            executed_at: None,
            completed_at: None,
            expires_at: None,
            last_error: None,
            dead_letter_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 设置重试策略
    pub fn with_retry(mut self, max_attempts: u32, retry_intervals: Vec<u64>) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_intervals = retry_intervals;
        self
    }

    /// 设置计划执行时间
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// 设置过期时间
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// 任务下一次应执行的时间
    pub fn due_at(&self) -> DateTime<Utc> {
        self.next_execute_at.unwrap_or(self.scheduled_at)
    }

    /// 是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// 是否还有剩余尝试次数
    pub fn has_attempts_left(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    /// 第 `attempt` 次失败后任务自身配置的重试间隔
    ///
    /// 超出列表长度时沿用最后一个间隔；列表为空时返回 `None`
    pub fn retry_interval(&self, attempt: u32) -> Option<Duration> {
        let index = attempt.max(1) as usize - 1;
        self.retry_intervals
            .get(index)
            .or_else(|| self.retry_intervals.last())
            .map(|secs| Duration::from_secs(*secs))
    }

    fn transition(&self, to: TaskStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.status,
                to,
            })
        }
    }

    /// 开始一次尝试
    ///
    /// 尝试计数在尝试开始时递增，因此 `current_attempt ≤ max_attempts` 始终成立
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 已派发的任务
    /// * `Err(DomainError)` - 状态转换失败或尝试次数已用尽
    pub fn dispatch(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Dispatched)?;
        if !self.has_attempts_left() {
            return Err(DomainError::AttemptsExhausted {
                current: self.current_attempt,
                max: self.max_attempts,
            });
        }

        self.status = TaskStatus::Dispatched;
        self.current_attempt += 1;
        self.executed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// 标记回调成功
    pub fn succeed(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Succeeded)?;
        self.status = TaskStatus::Succeeded;
        self.completed_at = Some(now);
        self.next_execute_at = None;
        self.last_error = None;
        self.updated_at = now;
        Ok(self)
    }

    /// 安排重试：状态回到 Pending，`next_execute_at = now + delay`
    pub fn retry_at(
        mut self,
        now: DateTime<Utc>,
        delay: Duration,
        error: impl Into<String>,
    ) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.next_execute_at = Some(now + to_chrono(delay));
        self.last_error = Some(error.into());
        self.updated_at = now;
        Ok(self)
    }

    /// 移入死信集合
    pub fn dead_letter(
        mut self,
        now: DateTime<Utc>,
        reason: DeadLetterReason,
        error: impl Into<String>,
    ) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Failed)?;
        self.status = TaskStatus::Failed;
        self.dead_letter_reason = Some(reason);
        self.last_error = Some(error.into());
        self.next_execute_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// 取消任务
    pub fn cancel(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Cancelled)?;
        self.status = TaskStatus::Cancelled;
        self.next_execute_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// 标记过期
    pub fn expire(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.transition(TaskStatus::Expired)?;
        self.status = TaskStatus::Expired;
        self.next_execute_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(self)
    }

    /// 从死信恢复
    ///
    /// 尝试计数归零并立即重新进入流水线，保留最后一次错误信息
    pub fn recover(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != TaskStatus::Failed || self.dead_letter_reason.is_none() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Pending,
            });
        }

        self.status = TaskStatus::Pending;
        self.current_attempt = 0;
        self.dead_letter_reason = None;
        self.next_execute_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        Ok(self)
    }
}
