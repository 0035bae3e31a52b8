// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{TestEngine, VISIBILITY};
use dispatchrs::domain::models::task::{TaskStatus, TaskUpdate};
use dispatchrs::domain::services::retry_coordinator::Resolution;
use dispatchrs::queue::broker::QueueBroker;
use dispatchrs::utils::clock::Clock;
use dispatchrs::workers::dispatcher::{CycleOutcome, SkipReason};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn callback_server(expected: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_duplicate_entry_invokes_callback_once() {
    let server = callback_server(1).await;
    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();
    // 代理写入重试导致的重复条目
    engine.scheduler.enqueue(&task).await.unwrap();

    let outcomes = engine.drain(&worker).await;
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], CycleOutcome::Attempted { .. }));
    assert_eq!(
        outcomes[1],
        CycleOutcome::Skipped {
            task_id: task.id,
            reason: SkipReason::Terminal(TaskStatus::Succeeded),
        }
    );

    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_concurrent_workers_share_one_attempt() {
    let server = callback_server(1).await;
    let engine = TestEngine::in_memory();
    let first = engine.worker("w-1");
    let second = engine.worker("w-2");

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();
    engine.scheduler.enqueue(&task).await.unwrap();

    let (a, b) = tokio::join!(first.poll_once(), second.poll_once());
    let attempted = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Attempted { .. }))
        .count();
    assert_eq!(attempted, 1);

    let done = engine.reload(&task).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.current_attempt, 1);
}

#[tokio::test]
async fn test_abandoned_attempt_is_redelivered_after_visibility_timeout() {
    let server = callback_server(1).await;
    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    // 另一个进程取走条目、开始尝试后崩溃：既未确认条目也未写回结果
    let queue = engine.ctx.topology.queue_for(task.priority);
    let stolen = engine.broker.dequeue(&[queue]).await.unwrap();
    assert!(stolen.is_some());
    let crashed = task.clone().dispatch(engine.clock.now()).unwrap();
    engine
        .store
        .update_task_status(
            task.id,
            TaskUpdate::from_task(&crashed).expecting(TaskStatus::Pending),
        )
        .await
        .unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), CycleOutcome::Idle);

    engine.clock.advance(VISIBILITY + Duration::from_secs(1));
    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted { resolution, .. } => assert_eq!(resolution, Resolution::Succeeded),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    // 被遗弃的尝试同样计入尝试次数
    let done = engine.reload(&task).await;
    assert_eq!(done.current_attempt, 2);
    let records = engine.store.list_execution_records(task.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt, 2);
}

#[tokio::test]
async fn test_task_abandoned_under_live_lock_is_recovered_by_reconcile() {
    let server = callback_server(1).await;
    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let reconciler = engine.reconciler();

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    // 持有者取走条目、拿到长期锁并开始尝试后崩溃
    let queue = engine.ctx.topology.queue_for(task.priority);
    assert!(engine.broker.dequeue(&[queue]).await.unwrap().is_some());
    engine
        .ctx
        .locks
        .acquire(task.id, "crashed", Duration::from_secs(600))
        .await
        .unwrap();
    let crashed = task.clone().dispatch(engine.clock.now()).unwrap();
    engine
        .store
        .update_task_status(
            task.id,
            TaskUpdate::from_task(&crashed).expecting(TaskStatus::Pending),
        )
        .await
        .unwrap();

    // 重新投递时锁仍存活，唯一的条目被确认丢弃
    engine.clock.advance(VISIBILITY + Duration::from_secs(1));
    assert_eq!(
        worker.poll_once().await.unwrap(),
        CycleOutcome::Skipped {
            task_id: task.id,
            reason: SkipReason::LockContention,
        }
    );

    engine.clock.advance(Duration::from_secs(300));
    assert_eq!(worker.poll_once().await.unwrap(), CycleOutcome::Idle);

    let report = reconciler.reconcile_once().await.unwrap();
    assert_eq!(report.recovered_dispatched, 1);
    assert_eq!(report.requeued, 0);

    match worker.poll_once().await.unwrap() {
        CycleOutcome::Attempted { resolution, .. } => assert_eq!(resolution, Resolution::Succeeded),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }
    let done = engine.reload(&task).await;
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.current_attempt, 2);
}

#[tokio::test]
async fn test_abandoned_task_without_attempts_left_is_dead_lettered_by_reconcile() {
    let server = callback_server(0).await;
    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");
    let reconciler = engine.reconciler();

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())).with_retry(1, vec![]))
        .await
        .unwrap();
    let queue = engine.ctx.topology.queue_for(task.priority);
    let stolen = engine.broker.dequeue(&[queue]).await.unwrap().unwrap();
    let crashed = task.clone().dispatch(engine.clock.now()).unwrap();
    engine
        .store
        .update_task_status(
            task.id,
            TaskUpdate::from_task(&crashed).expecting(TaskStatus::Pending),
        )
        .await
        .unwrap();
    // 条目在持有者崩溃前已被确认
    engine.broker.ack(&stolen.handle).await.unwrap();

    engine.clock.advance(Duration::from_secs(600));
    assert_eq!(worker.poll_once().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(reconciler.reconcile_once().await.unwrap().recovered_dispatched, 1);

    assert!(matches!(
        worker.poll_once().await.unwrap(),
        CycleOutcome::Exhausted { task_id, .. } if task_id == task.id
    ));
    let dead = engine.reload(&task).await;
    assert_eq!(dead.status, TaskStatus::Failed);
    assert!(dead.dead_letter_reason.is_some());
}

#[tokio::test]
async fn test_cancelled_task_is_never_invoked() {
    let server = callback_server(0).await;
    let engine = TestEngine::in_memory();
    let worker = engine.worker("w-1");

    let task = engine
        .scheduler
        .submit(engine.task(format!("{}/hook", server.uri())))
        .await
        .unwrap();
    let cancelled = task.clone().cancel(engine.clock.now()).unwrap();
    engine
        .store
        .update_task_status(
            task.id,
            TaskUpdate::from_task(&cancelled).expecting(TaskStatus::Pending),
        )
        .await
        .unwrap();

    assert_eq!(
        worker.poll_once().await.unwrap(),
        CycleOutcome::Skipped {
            task_id: task.id,
            reason: SkipReason::Terminal(TaskStatus::Cancelled),
        }
    );
    assert_eq!(engine.drain(&worker).await, vec![]);
}

#[tokio::test]
async fn test_cancellation_during_attempt_supersedes_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
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

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let running = engine.reload(&task).await;
        assert_eq!(running.status, TaskStatus::Dispatched);
        let cancelled = running.cancel(engine.clock.now()).unwrap();
        engine
            .store
            .update_task_status(
                task.id,
                TaskUpdate::from_task(&cancelled).expecting(TaskStatus::Dispatched),
            )
            .await
            .unwrap();
    };

    let (outcome, _) = tokio::join!(worker.poll_once(), cancel);
    match outcome.unwrap() {
        CycleOutcome::Attempted { resolution, .. } => assert_eq!(
            resolution,
            Resolution::Superseded {
                status: TaskStatus::Cancelled
            }
        ),
        other => panic!("unexpected cycle outcome: {:?}", other),
    }

    let stored = engine.reload(&task).await;
    assert_eq!(stored.status, TaskStatus::Cancelled);
    // 回调已经发出，执行记录照常保留
    assert_eq!(
        engine.store.list_execution_records(task.id).await.unwrap().len(),
        1
    );
    assert_eq!(engine.drain(&worker).await, vec![]);
}
