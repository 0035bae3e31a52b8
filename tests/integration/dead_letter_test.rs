// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::TestEngine;
use dispatchrs::domain::models::task::{DeadLetterReason, TaskStatus};
use dispatchrs::domain::repositories::task_store::DeadLetterFilter;
use dispatchrs::queue::scheduler::SchedulerError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_recovered_task_completes_with_gapless_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
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
    worker.poll_once().await.unwrap();

    let listed = engine
        .dead_letters
        .list(&DeadLetterFilter {
            reason: Some(DeadLetterReason::NonRetryable),
            ..DeadLetterFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, task.id);

    let recovered = engine.dead_letters.recover(task.id).await.unwrap();
    assert_eq!(recovered.status, TaskStatus::Pending);
    assert_eq!(recovered.current_attempt, 0);
    assert!(recovered.dead_letter_reason.is_none());

    // 已恢复的任务不能再次恢复
    assert!(matches!(
        engine.dead_letters.recover(task.id).await,
        Err(SchedulerError::Store(_))
    ));

    worker.poll_once().await.unwrap();
    let done = engine.reload(&task).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.current_attempt, 1);

    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(records.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 1]);
    assert_eq!(records[0].http_status, Some(410));
}

#[tokio::test]
async fn test_batch_recovery_honours_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let url = format!("{}/hook", server.uri());

    let mut invoices = Vec::new();
    for _ in 0..2 {
        let task = engine.scheduler.submit(engine.task(url.clone())).await.unwrap();
        invoices.push(task.id);
    }
    let mut refund = engine.task(url.clone());
    refund.task_type = "refund.issued".to_string();
    let refund = engine.scheduler.submit(refund).await.unwrap();

    engine.drain(&worker).await;
    assert_eq!(
        engine
            .dead_letters
            .list(&DeadLetterFilter::default())
            .await
            .unwrap()
            .len(),
        3
    );

    let report = engine
        .dead_letters
        .recover_batch(&DeadLetterFilter {
            task_type: Some("invoice.created".to_string()),
            ..DeadLetterFilter::default()
        })
        .await
        .unwrap();
    assert!(report.failed.is_empty());
    let mut recovered = report.recovered.clone();
    recovered.sort();
    invoices.sort();
    assert_eq!(recovered, invoices);

    let remaining = engine
        .dead_letters
        .list(&DeadLetterFilter::default())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, refund.id);

    for id in invoices {
        let task = engine.store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
