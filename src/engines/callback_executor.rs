// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::execution_record::NewExecutionRecord;
use crate::domain::models::outcome::CallbackOutcome;
use crate::domain::models::task::HttpMethod;
use crate::domain::repositories::task_store::TaskStore;
use crate::engines::circuit_breaker::CircuitBreakerRegistry;
use crate::engines::connection_pool::ConnectionPool;
use crate::engines::response_classifier::ResponseClassifier;
use crate::engines::traits::{CallbackInvoker, CallbackRequest, CallbackResult, ExecutorError};
use crate::infrastructure::observability::metrics::{record_attempt, record_callback_latency};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::FutureExt;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use sha2::Sha256;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

const TRUNCATION_MARKER: &str = "...[truncated]";

/// 回调执行器配置
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 任务未指定超时时使用的默认值
    pub default_timeout: Duration,
    /// 超时上限
    pub max_timeout: Duration,
    /// 响应体保留的最大字节数
    pub max_response_body_bytes: usize,
    /// 回调签名密钥
    pub signing_secret: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(60),
            max_response_body_bytes: 4096,
            signing_secret: None,
        }
    }
}

/// 一次发送的结果
struct Attempt {
    outcome: CallbackOutcome,
    body: Option<String>,
    /// 请求是否到达目标；未到达时不向熔断器报告
    reached_target: bool,
}

impl Attempt {
    fn not_sent(outcome: CallbackOutcome) -> Self {
        Self {
            outcome,
            body: None,
            reached_target: false,
        }
    }
}

/// HTTP 回调执行器
///
/// 在熔断器和连接池的约束下执行一次回调，并在返回前追加执行记录。
/// 尝试过程中的 panic 在此边界被捕获并转换为 `PanicRecovered`。
pub struct HttpCallbackExecutor {
    pool: Arc<ConnectionPool>,
    breakers: CircuitBreakerRegistry,
    classifier: ResponseClassifier,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
}

impl HttpCallbackExecutor {
    /// 创建新的回调执行器
    ///
    /// # 参数
    ///
    /// * `pool` - 共享连接池
    /// * `breakers` - 共享熔断器注册表
    /// * `classifier` - 响应分类器
    /// * `store` - 任务存储（用于追加执行记录）
    /// * `clock` - 时钟
    /// * `config` - 执行器配置
    pub fn new(
        pool: Arc<ConnectionPool>,
        breakers: CircuitBreakerRegistry,
        classifier: ResponseClassifier,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            breakers,
            classifier,
            store,
            clock,
            config,
        }
    }

    /// 实际生效的超时：任务超时或默认值，不超过上限
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.default_timeout)
            .min(self.config.max_timeout)
    }

    /// 发送一次回调；等待并发许可与请求本身共享同一个截止时间
    async fn send(&self, request: &CallbackRequest, target: &str) -> Attempt {
        let deadline = tokio::time::Instant::now() + self.effective_timeout(request.timeout);

        let _permit = match self.pool.acquire_until(target, deadline).await {
            Ok(permit) => permit,
            Err(e) => {
                return Attempt::not_sent(CallbackOutcome::NetworkError {
                    message: e.to_string(),
                    timed_out: true,
                })
            }
        };

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Attempt::not_sent(CallbackOutcome::NetworkError {
                message: format!("timed out waiting for a connection slot to {}", target),
                timed_out: true,
            });
        }

        let mut builder = self
            .pool
            .client()
            .request(to_method(request.target.method), &request.target.url)
            .timeout(remaining);

        let mut has_content_type = false;
        for (k, v) in &request.target.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                has_content_type |= name == CONTENT_TYPE;
                builder = builder.header(name, value);
            }
        }

        builder = builder
            .header("X-Dispatch-Task-Id", request.task_id.to_string())
            .header("X-Dispatch-Attempt", request.attempt.to_string())
            .header("X-Trace-Id", request.trace_id.as_str());

        let body = request.body.clone().unwrap_or_default();
        if let Some(secret) = &self.config.signing_secret {
            if let Some(signature) = sign(secret, &body) {
                builder = builder.header("X-Dispatch-Signature", signature);
            }
        }
        if request.body.is_some() {
            if !has_content_type {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body);
        }

        match builder.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                let body = read_capped(&mut response, self.config.max_response_body_bytes).await;
                Attempt {
                    outcome: self.classifier.classify_status(status),
                    body,
                    reached_target: true,
                }
            }
            Err(e) => {
                debug!(task_id = %request.task_id, "Callback transport error: {}", e);
                Attempt {
                    outcome: self.classifier.classify_error(&e),
                    body: None,
                    reached_target: true,
                }
            }
        }
    }
}

#[async_trait]
impl CallbackInvoker for HttpCallbackExecutor {
    #[instrument(
        skip(self, request),
        fields(task_id = %request.task_id, attempt = request.attempt, trace_id = %request.trace_id)
    )]
    async fn invoke(&self, request: &CallbackRequest) -> Result<CallbackResult, ExecutorError> {
        self.attempt_with(request, |target| async move { self.send(request, &target).await })
            .await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

impl HttpCallbackExecutor {
    /// 在熔断器约束下运行一次发送并追加执行记录
    ///
    /// `send` 只在熔断器放行时调用，其中的 panic 被转换为 `PanicRecovered`
    async fn attempt_with<F, Fut>(
        &self,
        request: &CallbackRequest,
        send: F,
    ) -> Result<CallbackResult, ExecutorError>
    where
        F: FnOnce(String) -> Fut + Send,
        Fut: Future<Output = Attempt> + Send,
    {
        let target = request.target_key();
        let started_at = self.clock.now();
        let start = Instant::now();

        let attempt = match self.breakers.try_acquire(&target) {
            Err(open) => Attempt::not_sent(CallbackOutcome::CircuitOpen {
                target: open.target,
                retry_after: open.retry_after,
            }),
            Ok(permit) => {
                let attempt = guard_attempt(send(target.clone())).await;
                match &attempt.outcome {
                    _ if !attempt.reached_target => drop(permit),
                    CallbackOutcome::NetworkError { .. } | CallbackOutcome::ServerError { .. } => {
                        permit.record_failure()
                    }
                    CallbackOutcome::Success { .. }
                    | CallbackOutcome::Redirect { .. }
                    | CallbackOutcome::ClientError { .. } => permit.record_success(),
                    CallbackOutcome::CircuitOpen { .. } | CallbackOutcome::PanicRecovered { .. } => {
                        drop(permit)
                    }
                }
                attempt
            }
        };

        let elapsed = start.elapsed();
        let outcome = attempt.outcome;
        record_attempt(&request.task_type, &target, outcome.class());
        if attempt.reached_target {
            record_callback_latency(&target, elapsed);
        }

        let record = NewExecutionRecord::from_outcome(
            request.task_id,
            request.attempt,
            request.worker_id.as_str(),
            started_at,
            elapsed.as_millis() as u64,
            &outcome,
            attempt.body,
            request.trace_id.as_str(),
        );
        let record = self.store.append_execution_record(record).await?;

        debug!(
            outcome = %outcome.class(),
            sequence = record.sequence,
            duration_ms = record.duration_ms,
            "Callback attempt recorded"
        );
        Ok(CallbackResult { outcome, record })
    }
}

/// 在执行器边界捕获 panic，转换为 `PanicRecovered`
async fn guard_attempt<F>(attempt: F) -> Attempt
where
    F: Future<Output = Attempt>,
{
    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(attempt) => attempt,
        Err(payload) => {
            let message = panic_message(payload);
            warn!("Recovered panic during callback attempt: {}", message);
            Attempt {
                outcome: CallbackOutcome::PanicRecovered { message },
                body: None,
                reached_target: false,
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn to_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// 对请求体计算十六进制 HMAC-SHA256 签名
pub fn sign(secret: &str, body: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// 读取响应体，超过上限的部分被截断并追加标记
async fn read_capped(response: &mut reqwest::Response, cap: usize) -> Option<String> {
    let mut buf = BytesMut::new();
    let mut truncated = false;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = cap.saturating_sub(buf.len());
                if chunk.len() > remaining {
                    buf.extend_from_slice(&chunk[..remaining]);
                    truncated = true;
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading callback response body: {}", e);
                break;
            }
        }
    }

    if buf.is_empty() && !truncated {
        return None;
    }

    let mut body = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        body.push_str(TRUNCATION_MARKER);
    }
    Some(body)
}

#[cfg(test)]
#[path = "callback_executor_test.rs"]
mod tests;
