// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dispatchrs::domain::models::task::{CallbackTarget, Task, TaskDefaults};
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
use dispatchrs::infrastructure::repositories::task_store_impl::SeaOrmTaskStore;
use dispatchrs::queue::health_monitor::{HealthThresholds, QueueHealthMonitor};
use dispatchrs::queue::scheduler::Scheduler;
use dispatchrs::queue::topology::QueueTopology;
use dispatchrs::utils::clock::{Clock, ManualClock};
use dispatchrs::workers::dispatcher::{
    CycleOutcome, DispatchContext, DispatchWorker, DispatcherConfig,
};
use dispatchrs::workers::reconcile_worker::{ReconcileConfig, ReconcileWorker};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 代理可见性超时
pub const VISIBILITY: Duration = Duration::from_secs(300);

/// 以内存代理和锁存储组装的调度引擎，时间由手动时钟控制
#[allow(dead_code)]
pub struct TestEngine {
    pub clock: ManualClock,
    pub store: Arc<dyn TaskStore>,
    pub broker: Arc<InMemoryQueueBroker>,
    pub scheduler: Arc<Scheduler>,
    pub breakers: CircuitBreakerRegistry,
    pub dead_letters: DeadLetterService,
    pub ctx: DispatchContext,
}

#[allow(dead_code)]
impl TestEngine {
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryTaskStore::new()), CircuitConfig::default())
    }

    pub fn with_breaker(config: CircuitConfig) -> Self {
        Self::with_store(Arc::new(InMemoryTaskStore::new()), config)
    }

    pub async fn sqlite() -> Self {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Self::with_store(
            Arc::new(SeaOrmTaskStore::new(Arc::new(db))),
            CircuitConfig::default(),
        )
    }

    fn with_store(store: Arc<dyn TaskStore>, breaker: CircuitConfig) -> Self {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let broker = Arc::new(InMemoryQueueBroker::new(shared_clock.clone(), VISIBILITY));
        let topology = QueueTopology::with_default_weights("it");
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            broker.clone(),
            topology.clone(),
            shared_clock.clone(),
        ));
        let coordinator = Arc::new(RetryCoordinator::new(
            store.clone(),
            scheduler.clone(),
            shared_clock.clone(),
            default_policy(),
        ));
        let breakers = CircuitBreakerRegistry::new(breaker, shared_clock.clone());
        let executor = Arc::new(HttpCallbackExecutor::new(
            Arc::new(ConnectionPool::new(PoolConfig::default()).unwrap()),
            breakers.clone(),
            ResponseClassifier::default(),
            store.clone(),
            shared_clock.clone(),
            ExecutorConfig {
                default_timeout: Duration::from_secs(2),
                ..ExecutorConfig::default()
            },
        ));
        let lock_store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new(shared_clock.clone()));
        let monitor = Arc::new(QueueHealthMonitor::new(
            broker.clone(),
            shared_clock.clone(),
            HealthThresholds::default(),
            topology.queue_names(),
        ));
        let dead_letters =
            DeadLetterService::new(store.clone(), scheduler.clone(), shared_clock.clone());

        let ctx = DispatchContext {
            broker: broker.clone(),
            store: store.clone(),
            locks: LockManager::new(lock_store, shared_clock.clone(), "it"),
            invoker: executor,
            coordinator,
            monitor,
            topology,
            clock: shared_clock,
            config: DispatcherConfig {
                lock_ttl: Duration::from_secs(120),
                renew_interval: Duration::from_secs(30),
                min_idle_backoff: Duration::from_millis(5),
                max_idle_backoff: Duration::from_millis(50),
                transient_retry: Duration::from_millis(5),
            },
        };

        Self {
            clock,
            store,
            broker,
            scheduler,
            breakers,
            dead_letters,
            ctx,
        }
    }

    pub fn worker(&self, id: &str) -> DispatchWorker {
        DispatchWorker::new(id, self.ctx.clone())
    }

    /// 对账 worker：锁最长存活 TTL 120 秒加超时上限 60 秒，陈旧阈值 60 秒
    pub fn reconciler(&self) -> ReconcileWorker {
        ReconcileWorker::new(
            self.store.clone(),
            self.scheduler.clone(),
            self.breakers.clone(),
            self.ctx.clock.clone(),
            ReconcileConfig {
                stale_threshold: Duration::from_secs(60),
                lock_horizon: self.ctx.config.lock_ttl + ExecutorConfig::default().max_timeout,
                ..ReconcileConfig::default()
            },
        )
    }

    /// 默认重试配置（3 次，间隔 60/300/900 秒）的新任务
    pub fn task(&self, url: String) -> Task {
        Task::new(
            Uuid::new_v4(),
            "invoice.created",
            CallbackTarget::post(url),
            &TaskDefaults::default(),
            self.clock.now(),
        )
    }

    /// 反复执行派发周期直到队列空闲
    pub async fn drain(&self, worker: &DispatchWorker) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match worker.poll_once().await.unwrap() {
                CycleOutcome::Idle => return outcomes,
                other => outcomes.push(other),
            }
        }
    }

    pub async fn reload(&self, task: &Task) -> Task {
        self.store.get_task(task.id).await.unwrap().unwrap()
    }
}
