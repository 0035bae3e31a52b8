// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::task::DomainError;

/// 单次回调尝试的结果
///
/// 任务级失败不作为错误抛出，而是以该类型返回，由重试协调器穷尽匹配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CallbackOutcome {
    /// 状态码落在成功区间
    Success { status: u16 },
    /// 3xx，是否可重试由重定向策略决定
    Redirect { status: u16, retryable: bool },
    /// 4xx 或恢复的 panic；白名单中的状态码可重试
    ClientError {
        status: u16,
        retryable: bool,
    },
    /// 5xx
    ServerError { status: u16 },
    /// 连接错误或超时
    NetworkError { message: String, timed_out: bool },
    /// 熔断器打开，未发出网络请求
    CircuitOpen {
        target: String,
        retry_after: Duration,
    },
    /// 尝试过程中发生 panic，已在执行器边界恢复
    PanicRecovered { message: String },
}

impl CallbackOutcome {
    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            CallbackOutcome::Success { .. } => false,
            CallbackOutcome::Redirect { retryable, .. } => *retryable,
            CallbackOutcome::ClientError { retryable, .. } => *retryable,
            CallbackOutcome::ServerError { .. } => true,
            CallbackOutcome::NetworkError { .. } => true,
            CallbackOutcome::CircuitOpen { .. } => true,
            // 按客户端错误处理
            CallbackOutcome::PanicRecovered { .. } => false,
        }
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, CallbackOutcome::Success { .. })
    }

    /// 结果分类
    pub fn class(&self) -> OutcomeClass {
        match self {
            CallbackOutcome::Success { .. } => OutcomeClass::Success,
            CallbackOutcome::Redirect { .. } => OutcomeClass::Redirect,
            CallbackOutcome::ClientError { .. } => OutcomeClass::ClientError,
            CallbackOutcome::ServerError { .. } => OutcomeClass::ServerError,
            CallbackOutcome::NetworkError { .. } => OutcomeClass::NetworkError,
            CallbackOutcome::CircuitOpen { .. } => OutcomeClass::CircuitOpen,
            CallbackOutcome::PanicRecovered { .. } => OutcomeClass::PanicRecovered,
        }
    }

    /// HTTP 状态码（如有）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            CallbackOutcome::Success { status }
            | CallbackOutcome::Redirect { status, .. }
            | CallbackOutcome::ClientError { status, .. }
            | CallbackOutcome::ServerError { status } => Some(*status),
            _ => None,
        }
    }

    /// 人类可读的错误描述，成功时为 `None`
    pub fn error_message(&self) -> Option<String> {
        match self {
            CallbackOutcome::Success { .. } => None,
            CallbackOutcome::Redirect { status, .. } => {
                Some(format!("callback redirected with status {}", status))
            }
            CallbackOutcome::ClientError { status, .. } => {
                Some(format!("callback rejected with status {}", status))
            }
            CallbackOutcome::ServerError { status } => {
                Some(format!("callback failed with status {}", status))
            }
            CallbackOutcome::NetworkError { message, timed_out } => Some(if *timed_out {
                format!("callback timed out: {}", message)
            } else {
                format!("network error: {}", message)
            }),
            CallbackOutcome::CircuitOpen {
                target,
                retry_after,
            } => Some(format!(
                "circuit open for {} (retry after {}s)",
                target,
                retry_after.as_secs()
            )),
            CallbackOutcome::PanicRecovered { message } => {
                Some(format!("panic during callback: {}", message))
            }
        }
    }
}

/// 结果分类，用于执行记录与指标标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    NetworkError,
    CircuitOpen,
    PanicRecovered,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::Redirect => "redirect",
            OutcomeClass::ClientError => "client_error",
            OutcomeClass::ServerError => "server_error",
            OutcomeClass::NetworkError => "network_error",
            OutcomeClass::CircuitOpen => "circuit_open",
            OutcomeClass::PanicRecovered => "panic_recovered",
        }
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(OutcomeClass::Success),
            "redirect" => Ok(OutcomeClass::Redirect),
            "client_error" => Ok(OutcomeClass::ClientError),
            "server_error" => Ok(OutcomeClass::ServerError),
            "network_error" => Ok(OutcomeClass::NetworkError),
            "circuit_open" => Ok(OutcomeClass::CircuitOpen),
            "panic_recovered" => Ok(OutcomeClass::PanicRecovered),
            other => Err(DomainError::ValidationError(format!(
                "unknown outcome class: {}",
                other
            ))),
        }
    }
}
