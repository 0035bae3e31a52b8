// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 调度核心的指标记录接口
//!
//! 核心只通过这些辅助函数经由 `metrics` 门面记录指标；导出器仅在二进制中安装

use crate::domain::models::outcome::OutcomeClass;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// 初始化指标系统
///
/// 安装 Prometheus 导出器并注册所有指标的描述
pub fn init_metrics(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    describe_metrics();
    Ok(())
}

/// 注册指标描述
pub fn describe_metrics() {
    describe_counter!(
        "dispatch_attempts_total",
        "Callback attempts by task type, target and outcome class"
    );
    describe_counter!(
        "dispatch_task_resolutions_total",
        "Retry coordinator resolutions by task type"
    );
    describe_counter!(
        "dispatch_lock_contention_total",
        "Deliveries skipped because another worker held the task lock"
    );
    describe_counter!(
        "dispatch_lock_lost_total",
        "Attempts aborted because the task lock was lost mid-flight"
    );
    describe_counter!(
        "dispatch_dead_letter_total",
        "Tasks moved to the dead-letter set"
    );
    describe_counter!(
        "circuit_breaker_rejected_total",
        "Calls short-circuited by an open circuit breaker"
    );
    describe_gauge!("dispatch_queue_depth", "Pending entries per queue");
    describe_gauge!(
        "dispatch_queue_oldest_age_seconds",
        "Age of the oldest ready entry per queue"
    );
    describe_gauge!(
        "dispatch_queue_health",
        "Queue health tier (0=Healthy, 1=Degraded, 2=Critical)"
    );
    describe_gauge!(
        "circuit_breaker_status",
        "Current status of circuit breaker (0=Closed, 0.5=HalfOpen, 1=Open)"
    );
    describe_gauge!("dispatch_http_in_flight", "Callback requests in flight");
    describe_histogram!(
        "dispatch_callback_latency_seconds",
        "Callback latency in seconds"
    );
}

pub fn record_attempt(task_type: &str, target: &str, outcome: OutcomeClass) {
    counter!(
        "dispatch_attempts_total",
        "task_type" => task_type.to_string(),
        "target" => target.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_resolution(task_type: &str, resolution: &'static str) {
    counter!(
        "dispatch_task_resolutions_total",
        "task_type" => task_type.to_string(),
        "resolution" => resolution
    )
    .increment(1);
}

pub fn record_dead_letter(task_type: &str, reason: &str) {
    counter!(
        "dispatch_dead_letter_total",
        "task_type" => task_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_lock_contention() {
    counter!("dispatch_lock_contention_total").increment(1);
}

pub fn record_lock_lost() {
    counter!("dispatch_lock_lost_total").increment(1);
}

pub fn record_breaker_rejected(target: &str) {
    counter!("circuit_breaker_rejected_total", "target" => target.to_string()).increment(1);
}

pub fn set_breaker_status(target: &str, value: f64) {
    gauge!("circuit_breaker_status", "target" => target.to_string()).set(value);
}

pub fn set_queue_depth(queue: &str, depth: u64) {
    gauge!("dispatch_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

pub fn set_queue_oldest_age(queue: &str, age: Duration) {
    gauge!("dispatch_queue_oldest_age_seconds", "queue" => queue.to_string())
        .set(age.as_secs_f64());
}

pub fn set_queue_health(queue: &str, value: f64) {
    gauge!("dispatch_queue_health", "queue" => queue.to_string()).set(value);
}

pub fn http_in_flight_inc() {
    gauge!("dispatch_http_in_flight").increment(1.0);
}

pub fn http_in_flight_dec() {
    gauge!("dispatch_http_in_flight").decrement(1.0);
}

pub fn record_callback_latency(target: &str, elapsed: Duration) {
    histogram!("dispatch_callback_latency_seconds", "target" => target.to_string())
        .record(elapsed.as_secs_f64());
}
