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

use anyhow::Context;
use dispatchrs::config::settings::{BrokerBackend, Settings, TaskStoreBackend};
use dispatchrs::domain::repositories::lock_store::LockStore;
use dispatchrs::domain::repositories::task_store::TaskStore;
use dispatchrs::domain::services::dead_letter_service::DeadLetterService;
use dispatchrs::domain::services::lock_manager::LockManager;
use dispatchrs::domain::services::retry_coordinator::RetryCoordinator;
use dispatchrs::engines::callback_executor::HttpCallbackExecutor;
use dispatchrs::engines::circuit_breaker::CircuitBreakerRegistry;
use dispatchrs::engines::connection_pool::ConnectionPool;
use dispatchrs::infrastructure::cache::redis_client::RedisClient;
use dispatchrs::infrastructure::database::connection;
use dispatchrs::infrastructure::lock::memory_lock_store::InMemoryLockStore;
use dispatchrs::infrastructure::lock::redis_lock_store::RedisLockStore;
use dispatchrs::infrastructure::observability::metrics;
use dispatchrs::infrastructure::queue::memory_broker::InMemoryQueueBroker;
use dispatchrs::infrastructure::queue::redis_broker::RedisQueueBroker;
use dispatchrs::infrastructure::repositories::memory_task_store::InMemoryTaskStore;
use dispatchrs::infrastructure::repositories::task_store_impl::SeaOrmTaskStore;
use dispatchrs::presentation::routes;
use dispatchrs::presentation::state::AppState;
use dispatchrs::queue::broker::QueueBroker;
use dispatchrs::queue::health_monitor::QueueHealthMonitor;
use dispatchrs::queue::scheduler::Scheduler;
use dispatchrs::utils::clock::{Clock, SystemClock};
use dispatchrs::utils::telemetry;
use dispatchrs::workers::dispatcher::DispatchContext;
use dispatchrs::workers::health_sampler::HealthSampler;
use dispatchrs::workers::manager::WorkerManager;
use dispatchrs::workers::reconcile_worker::ReconcileWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration and initialize logging
    let settings = Settings::new().context("failed to load configuration")?;
    telemetry::init_telemetry(settings.telemetry.json);
    info!("Starting dispatchrs...");

    if settings.metrics.enabled {
        let listen: SocketAddr = settings
            .metrics
            .listen
            .parse()
            .context("invalid metrics listen address")?;
        metrics::init_metrics(listen)?;
        info!(%listen, "Prometheus exporter listening");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let topology = settings.queues.topology();

    // 2. Shared state backends
    let (broker, lock_store): (Arc<dyn QueueBroker>, Arc<dyn LockStore>) =
        match settings.backends.broker {
            BrokerBackend::Redis => {
                let redis = RedisClient::new(&settings.redis.url)?;
                redis.ping().await.context("redis is unreachable")?;
                info!("Redis client initialized");
                (
                    Arc::new(RedisQueueBroker::new(
                        redis.clone(),
                        clock.clone(),
                        settings.queues.key_prefix.clone(),
                        settings.dispatcher.visibility_timeout(),
                    )),
                    Arc::new(RedisLockStore::new(redis)),
                )
            }
            BrokerBackend::Memory => {
                info!("Using in-memory broker and lock store");
                (
                    Arc::new(InMemoryQueueBroker::new(
                        clock.clone(),
                        settings.dispatcher.visibility_timeout(),
                    )),
                    Arc::new(InMemoryLockStore::new(clock.clone())),
                )
            }
        };

    // 3. Task store
    let store: Arc<dyn TaskStore> = match settings.backends.task_store {
        TaskStoreBackend::Database => {
            let db = connection::connect_and_migrate(&settings.database).await?;
            info!("Database connection established");
            Arc::new(SeaOrmTaskStore::new(Arc::new(db)))
        }
        TaskStoreBackend::Memory => {
            info!("Using in-memory task store");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    // 4. Core services
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        broker.clone(),
        topology.clone(),
        clock.clone(),
    ));

    let mut coordinator = RetryCoordinator::new(
        store.clone(),
        scheduler.clone(),
        clock.clone(),
        settings.default_backoff(),
    );
    for (task_type, policy) in settings.backoff_overrides() {
        coordinator = coordinator.with_policy(task_type, policy);
    }
    let coordinator = Arc::new(coordinator);

    let breakers = CircuitBreakerRegistry::new(settings.circuit_config(), clock.clone());
    let pool = Arc::new(ConnectionPool::new(settings.pool_config())?);
    let executor = Arc::new(HttpCallbackExecutor::new(
        pool,
        breakers.clone(),
        settings.classifier(),
        store.clone(),
        clock.clone(),
        settings.executor_config(),
    ));

    let monitor = Arc::new(QueueHealthMonitor::new(
        broker.clone(),
        clock.clone(),
        settings.health_thresholds(),
        topology.queue_names(),
    ));
    let dead_letters = Arc::new(DeadLetterService::new(
        store.clone(),
        scheduler.clone(),
        clock.clone(),
    ));

    // 5. Start Workers
    let node_id = format!("dispatch-{}", Uuid::new_v4().simple());
    let ctx = DispatchContext {
        broker: broker.clone(),
        store: store.clone(),
        locks: LockManager::new(lock_store, clock.clone(), settings.queues.key_prefix.clone()),
        invoker: executor,
        coordinator,
        monitor: monitor.clone(),
        topology,
        clock: clock.clone(),
        config: settings.dispatcher.worker_config(),
    };

    let mut workers = WorkerManager::new();
    workers.start_dispatchers(ctx, settings.dispatcher.workers, &node_id);
    workers.spawn(Arc::new(ReconcileWorker::new(
        store,
        scheduler,
        breakers.clone(),
        clock,
        settings
            .dispatcher
            .reconcile_config(Duration::from_secs(settings.http_client.max_timeout_secs)),
    )));
    workers.spawn(Arc::new(HealthSampler::new(
        monitor.clone(),
        Duration::from_secs(settings.health.sample_interval_secs.max(1)),
    )));
    info!(node_id = %node_id, workers = workers.len(), "Workers started");

    // 6. Start operator HTTP server
    let app = routes::routes(AppState {
        dead_letters,
        monitor,
        breakers,
    });

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let mut shutdown = workers.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
    });

    workers.wait_for_shutdown().await;
    server.await??;

    info!("dispatchrs stopped");
    Ok(())
}
