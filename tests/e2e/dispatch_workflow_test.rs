// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dispatchrs::domain::models::task::{CallbackTarget, Priority, Task, TaskDefaults, TaskStatus};
use dispatchrs::domain::repositories::lock_store::LockStore;
use dispatchrs::domain::repositories::task_store::TaskStore;
use dispatchrs::domain::services::dead_letter_service::DeadLetterService;
use dispatchrs::domain::services::lock_manager::LockManager;
use dispatchrs::domain::services::retry_coordinator::{default_policy, RetryCoordinator};
use dispatchrs::engines::callback_executor::{ExecutorConfig, HttpCallbackExecutor};
use dispatchrs::engines::circuit_breaker::{CircuitBreakerRegistry, CircuitConfig};
use dispatchrs::engines::connection_pool::{ConnectionPool, PoolConfig};
use dispatchrs::engines::response_classifier::ResponseClassifier;
use dispatchrs::infrastructure::lock::memory_lock_store::InMemoryLockStore;
use dispatchrs::infrastructure::queue::memory_broker::InMemoryQueueBroker;
use dispatchrs::infrastructure::repositories::memory_task_store::InMemoryTaskStore;
use dispatchrs::presentation::routes;
use dispatchrs::presentation::state::AppState;
use dispatchrs::queue::health_monitor::{HealthThresholds, QueueHealthMonitor};
use dispatchrs::queue::scheduler::Scheduler;
use dispatchrs::queue::topology::QueueTopology;
use dispatchrs::utils::clock::{Clock, SystemClock};
use dispatchrs::workers::dispatcher::{DispatchContext, DispatcherConfig};
use dispatchrs::workers::manager::WorkerManager;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// 轮询任务存储直到所有任务进入终态
async fn wait_for_terminal(store: &Arc<dyn TaskStore>, ids: &[Uuid], timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut done = 0;
        for id in ids {
            if let Some(task) = store.get_task(*id).await.unwrap() {
                if task.status.is_terminal() {
                    done += 1;
                }
            }
        }
        if done == ids.len() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of {} tasks finished in time",
            done,
            ids.len()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_workflow_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    // Assemble the engine with the real clock
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let broker = Arc::new(InMemoryQueueBroker::new(clock.clone(), Duration::from_secs(30)));
    let topology = QueueTopology::with_default_weights("e2e");
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        broker.clone(),
        topology.clone(),
        clock.clone(),
    ));
    let breakers = CircuitBreakerRegistry::new(CircuitConfig::default(), clock.clone());
    let executor = Arc::new(HttpCallbackExecutor::new(
        Arc::new(ConnectionPool::new(PoolConfig::default()).unwrap()),
        breakers.clone(),
        ResponseClassifier::default(),
        store.clone(),
        clock.clone(),
        ExecutorConfig {
            signing_secret: Some("e2e-secret".to_string()),
            ..ExecutorConfig::default()
        },
    ));
    let lock_store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new(clock.clone()));
    let monitor = Arc::new(QueueHealthMonitor::new(
        broker.clone(),
        clock.clone(),
        HealthThresholds::default(),
        topology.queue_names(),
    ));
    let dead_letters = Arc::new(DeadLetterService::new(
        store.clone(),
        scheduler.clone(),
        clock.clone(),
    ));
    let ctx = DispatchContext {
        broker: broker.clone(),
        store: store.clone(),
        locks: LockManager::new(lock_store, clock.clone(), "e2e"),
        invoker: executor,
        coordinator: Arc::new(RetryCoordinator::new(
            store.clone(),
            scheduler.clone(),
            clock.clone(),
            default_policy(),
        )),
        monitor: monitor.clone(),
        topology,
        clock: clock.clone(),
        config: DispatcherConfig {
            min_idle_backoff: Duration::from_millis(10),
            max_idle_backoff: Duration::from_millis(100),
            ..DispatcherConfig::default()
        },
    };

    // Submit tasks across priorities
    let tenant = Uuid::new_v4();
    let priorities = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Normal,
    ];
    let mut ids = Vec::new();
    for priority in priorities {
        let task = Task::new(
            tenant,
            "order.shipped",
            CallbackTarget::post(format!("{}/ok", server.uri())),
            &TaskDefaults::default(),
            clock.now(),
        )
        .with_priority(priority);
        ids.push(scheduler.submit(task).await.unwrap().id);
    }
    let flaky = Task::new(
        tenant,
        "order.shipped",
        CallbackTarget::post(format!("{}/flaky", server.uri())),
        &TaskDefaults::default(),
        clock.now(),
    )
    .with_retry(3, vec![1, 1]);
    let flaky = scheduler.submit(flaky).await.unwrap();
    ids.push(flaky.id);
    let gone = Task::new(
        tenant,
        "order.refunded",
        CallbackTarget::post(format!("{}/gone", server.uri())),
        &TaskDefaults::default(),
        clock.now(),
    );
    let gone = scheduler.submit(gone).await.unwrap();
    ids.push(gone.id);

    let mut workers = WorkerManager::new();
    workers.start_dispatchers(ctx, 2, "e2e-node");
    assert_eq!(workers.len(), 2);

    wait_for_terminal(&store, &ids, Duration::from_secs(15)).await;

    for id in &ids[..5] {
        let task = store.get_task(*id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.current_attempt, 1);
    }
    let flaky = store.get_task(flaky.id).await.unwrap().unwrap();
    assert_eq!(flaky.status, TaskStatus::Succeeded);
    assert_eq!(flaky.current_attempt, 2);
    let gone = store.get_task(gone.id).await.unwrap().unwrap();
    assert_eq!(gone.status, TaskStatus::Failed);

    monitor.sample().await.unwrap();

    // Operator HTTP surface
    let app = routes::routes(AppState {
        dead_letters,
        monitor,
        breakers,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let queues: Value = client
        .get(format!("{}/v1/queues/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let queues = queues.as_array().unwrap();
    assert_eq!(queues.len(), 4);
    assert!(queues.iter().all(|q| q["ready"] == 0));

    let dead: Value = client
        .get(format!("{}/v1/dead-letters?tenant_id={}", base, tenant))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let dead = dead.as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["id"], gone.id.to_string());
    assert_eq!(dead[0]["dead_letter_reason"], "non_retryable");

    let breakers: Value = client
        .get(format!("{}/v1/circuit-breakers", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(breakers
        .as_array()
        .unwrap()
        .iter()
        .all(|b| b["status"] == "closed"));

    workers.shutdown().await;
    server_handle.abort();
}
