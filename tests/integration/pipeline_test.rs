// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestEngine;
use dispatchrs::domain::models::outcome::OutcomeClass;
use dispatchrs::domain::models::task::{DeadLetterReason, TaskStatus};
use dispatchrs::domain::services::retry_coordinator::Resolution;
use dispatchrs::engines::circuit_breaker::{CircuitConfig, Status};
use dispatchrs::workers::dispatcher::CycleOutcome;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_failed_callback_is_retried_after_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted {
            outcome,
            resolution: Resolution::Rescheduled { .. },
            ..
        } => assert_eq!(outcome, OutcomeClass::ServerError),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    // 重试间隔未到，条目仍在延迟集合中
    assert_eq!(worker.poll_once().await.unwrap(), CycleOutcome::Idle);
    let pending = engine.reload(&task).await;
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(pending.current_attempt, 1);

    engine.clock.advance(Duration::from_secs(60));
    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted { resolution, .. } => assert_eq!(resolution, Resolution::Succeeded),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    let done = engine.reload(&task).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.current_attempt, 2);

    let records = engine.store.list_execution_records(task.id).await.unwrap();
    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(records[0].http_status, Some(503));
    assert_eq!(records[1].outcome, OutcomeClass::Success);
}

#[tokio::test]
async fn test_exhausted_retries_reach_dead_letter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    worker.poll_once().await.unwrap();
    engine.clock.advance(Duration::from_secs(60));
    worker.poll_once().await.unwrap();
    engine.clock.advance(Duration::from_secs(300));

    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted { resolution, .. } => assert_eq!(
            resolution,
            Resolution::DeadLettered {
                reason: DeadLetterReason::RetriesExhausted
            }
        ),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    let dead = engine.reload(&task).await;
    assert_eq!(dead.status, TaskStatus::Failed);
    assert_eq!(dead.current_attempt, 3);
    assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::RetriesExhausted));
    assert!(dead.completed_at.is_some());

    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].response_body.as_deref(), Some("boom"));

    // 死信任务不会再被派发
    engine.clock.advance(Duration::from_secs(3600));
    assert!(engine.drain(&worker).await.is_empty());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/gone", server.uri())))
        .await
        .unwrap();

    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted {
            outcome,
            resolution,
            ..
        } => {
            assert_eq!(outcome, OutcomeClass::ClientError);
            assert_eq!(
                resolution,
                Resolution::DeadLettered {
                    reason: DeadLetterReason::NonRetryable
                }
            );
        }
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    let dead = engine.reload(&task).await;
    assert_eq!(dead.current_attempt, 1);
    assert_eq!(dead.dead_letter_reason, Some(DeadLetterReason::NonRetryable));
}

#[tokio::test]
async fn test_open_circuit_short_circuits_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let engine = TestEngine::with_breaker(CircuitConfig {
        failure_threshold: 2,
        cooldown: Duration::from_secs(3600),
        failure_window: Duration::from_secs(3600),
        ..CircuitConfig::default()
    });
    let worker = engine.worker("w-1");
    let url = format!("{}/hook", server.uri());
    let task = engine.scheduler.submit(engine.task(url)).await.unwrap();

    worker.poll_once().await.unwrap();
    engine.clock.advance(Duration::from_secs(60));
    worker.poll_once().await.unwrap();

    let snapshots = engine.breakers.snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, Status::Open);

    engine.clock.advance(Duration::from_secs(300));
    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted {
            outcome,
            resolution,
            ..
        } => {
            assert_eq!(outcome, OutcomeClass::CircuitOpen);
            assert_eq!(
                resolution,
                Resolution::DeadLettered {
                    reason: DeadLetterReason::RetriesExhausted
                }
            );
        }
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    // 熔断期间的尝试同样留下执行记录
    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].outcome, OutcomeClass::CircuitOpen);
    assert_eq!(records[2].http_status, None);
}

#[tokio::test]
async fn test_callback_carries_trace_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header_exists("x-trace-id"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    worker.poll_once().await.unwrap();
    assert_eq!(engine.reload(&task).await.status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_pipeline_on_database_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = TestEngine::sqlite().await;
    let worker = engine.worker("w-1");
    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    worker.poll_once().await.unwrap();
    engine.clock.advance(Duration::from_secs(60));
    worker.poll_once().await.unwrap();

    let done = engine.reload(&task).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.current_attempt, 2);

    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2]);
}
