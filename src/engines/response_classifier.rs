// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::outcome::CallbackOutcome;
use serde::Deserialize;
use std::collections::HashSet;

/// 3xx 响应的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedirectPolicy {
    /// 原样记录，不重试
    #[default]
    NonRetryable,
    /// 作为可重试失败
    Retryable,
}

/// 响应分类器
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    success_min: u16,
    success_max: u16,
    redirect_policy: RedirectPolicy,
    retryable_client_statuses: HashSet<u16>,
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new(200, 299, RedirectPolicy::default(), [408, 429])
    }
}

impl ResponseClassifier {
    /// 创建响应分类器
    ///
    /// # 参数
    ///
    /// * `success_min` / `success_max` - 成功状态码区间（闭区间）
    /// * `redirect_policy` - 3xx 处理策略
    /// * `retryable_client_statuses` - 可重试的 4xx 白名单
    pub fn new(
        success_min: u16,
        success_max: u16,
        redirect_policy: RedirectPolicy,
        retryable_client_statuses: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            success_min,
            success_max,
            redirect_policy,
            retryable_client_statuses: retryable_client_statuses.into_iter().collect(),
        }
    }

    /// 按状态码分类
    pub fn classify_status(&self, status: u16) -> CallbackOutcome {
        if (self.success_min..=self.success_max).contains(&status) {
            return CallbackOutcome::Success { status };
        }

        match status {
            300..=399 => CallbackOutcome::Redirect {
                status,
                retryable: self.redirect_policy == RedirectPolicy::Retryable,
            },
            500..=599 => CallbackOutcome::ServerError { status },
            _ => CallbackOutcome::ClientError {
                status,
                retryable: self.retryable_client_statuses.contains(&status),
            },
        }
    }

    /// 按传输层错误分类
    pub fn classify_error(&self, err: &reqwest::Error) -> CallbackOutcome {
        CallbackOutcome::NetworkError {
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }
}
