#[cfg(test)]
mod tests {
    use crate::domain::models::execution_record::NewExecutionRecord;
    use crate::domain::models::outcome::{CallbackOutcome, OutcomeClass};
    use crate::domain::models::task::{
        CallbackTarget, DeadLetterReason, HttpMethod, Priority, Task, TaskDefaults, TaskStatus,
        TaskUpdate,
    };
    use crate::domain::repositories::task_store::{DeadLetterFilter, StoreError, TaskStore};
    use crate::infrastructure::repositories::task_store_impl::SeaOrmTaskStore;
    use chrono::{Duration, DurationRound, Utc};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};
    use std::sync::Arc;
    use uuid::Uuid;

    async fn setup_db() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let db = Arc::new(db);
        Migrator::up(db.as_ref(), None).await.unwrap();
        db
    }

    fn now() -> chrono::DateTime<Utc> {
        // 去掉亚秒部分，避免不同后端的时间精度影响比较
        Utc::now().duration_trunc(Duration::seconds(1)).unwrap()
    }

    fn sample_task() -> Task {
        let mut callback = CallbackTarget::post("https://tenant.example/hooks/order");
        callback.method = HttpMethod::Put;
        callback
            .headers
            .insert("Authorization".to_string(), "Bearer abc".to_string());
        callback.body_template = Some(r#"{"id":"{{task_id}}"}"#.to_string());

        Task::new(
            Uuid::new_v4(),
            "order.created",
            callback,
            &TaskDefaults::default(),
            now(),
        )
        .with_priority(Priority::Critical)
    }

    #[tokio::test]
    async fn test_create_and_get_round_trips_fields() {
        let store = SeaOrmTaskStore::new(setup_db().await);
        let task = sample_task().expiring_at(now() + Duration::hours(1));

        store.create_task(&task).await.unwrap();
        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);

        let duplicate = store.create_task(&task).await;
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists(id)) if id == task.id));
    }

    #[tokio::test]
    async fn test_update_respects_expected_status() {
        let store = SeaOrmTaskStore::new(setup_db().await);
        let task = store.create_task(&sample_task()).await.unwrap();

        let running = task.clone().dispatch(now()).unwrap();
        let stored = store
            .update_task_status(
                task.id,
                TaskUpdate::from_task(&running).expecting(TaskStatus::Pending),
            )
            .await
            .unwrap();
        assert_eq!(stored.status, TaskStatus::Dispatched);
        assert_eq!(stored.current_attempt, 1);

        let again = store
            .update_task_status(
                task.id,
                TaskUpdate::from_task(&running).expecting(TaskStatus::Pending),
            )
            .await;
        assert!(matches!(
            again,
            Err(StoreError::Conflict {
                expected: TaskStatus::Pending,
                actual: TaskStatus::Dispatched,
                ..
            })
        ));

        let missing = store
            .update_task_status(Uuid::new_v4(), TaskUpdate::from_task(&running))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_execution_records_get_sequential_numbers() {
        let store = SeaOrmTaskStore::new(setup_db().await);
        let task = store.create_task(&sample_task()).await.unwrap();

        for attempt in 1..=3 {
            let record = NewExecutionRecord::from_outcome(
                task.id,
                attempt,
                "worker-1",
                now(),
                40,
                &CallbackOutcome::ServerError { status: 502 },
                Some("bad gateway".to_string()),
                "trace-xyz",
            );
            let appended = store.append_execution_record(record).await.unwrap();
            assert_eq!(appended.sequence, attempt as u64);
        }

        let records = store.list_execution_records(task.id).await.unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(records[0].outcome, OutcomeClass::ServerError);
        assert_eq!(records[0].http_status, Some(502));

        let orphan = NewExecutionRecord::from_outcome(
            Uuid::new_v4(),
            1,
            "worker-1",
            now(),
            1,
            &CallbackOutcome::Success { status: 200 },
            None,
            "trace",
        );
        assert!(matches!(
            store.append_execution_record(orphan).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dead_letter_listing_and_recovery() {
        let store = SeaOrmTaskStore::new(setup_db().await);

        let mut ids = Vec::new();
        for reason in [DeadLetterReason::RetriesExhausted, DeadLetterReason::NonRetryable] {
            let task = store.create_task(&sample_task()).await.unwrap();
            let failed = task
                .dispatch(now())
                .unwrap()
                .dead_letter(now(), reason, "callback failed with status 410")
                .unwrap();
            store
                .update_task_status(failed.id, TaskUpdate::from_task(&failed))
                .await
                .unwrap();
            ids.push(failed.id);
        }
        store.create_task(&sample_task()).await.unwrap();

        let all = store
            .list_dead_letter(&DeadLetterFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let exhausted = store
            .list_dead_letter(&DeadLetterFilter {
                reason: Some(DeadLetterReason::RetriesExhausted),
                ..DeadLetterFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].id, ids[0]);

        let recovered = store.recover_dead_letter(ids[0], now()).await.unwrap();
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.current_attempt, 0);
        assert_eq!(
            recovered.last_error.as_deref(),
            Some("callback failed with status 410")
        );

        let pending = store.get_task(ids[0]).await.unwrap().unwrap();
        let result = store.recover_dead_letter(pending.id, now()).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_stale_pending_uses_due_time() {
        let store = SeaOrmTaskStore::new(setup_db().await);
        let base = now();

        let old = store
            .create_task(&sample_task().scheduled_for(base - Duration::minutes(10)))
            .await
            .unwrap();
        store
            .create_task(&sample_task().scheduled_for(base + Duration::minutes(10)))
            .await
            .unwrap();

        let stale = store
            .list_stale_pending(base - Duration::minutes(1), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_stale_dispatched_uses_attempt_start() {
        let store = SeaOrmTaskStore::new(setup_db().await);
        let base = now();

        let mut ids = Vec::new();
        for started in [base - Duration::minutes(20), base - Duration::minutes(1)] {
            let created = store.create_task(&sample_task()).await.unwrap();
            let running = created.dispatch(started).unwrap();
            store
                .update_task_status(
                    running.id,
                    TaskUpdate::from_task(&running).expecting(TaskStatus::Pending),
                )
                .await
                .unwrap();
            ids.push(running.id);
        }
        // Pending 任务即使早已到期也不在结果中
        store
            .create_task(&sample_task().scheduled_for(base - Duration::hours(1)))
            .await
            .unwrap();

        let stale = store
            .list_stale_dispatched(base - Duration::minutes(10), 10)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, ids[0]);
        assert_eq!(stale[0].status, TaskStatus::Dispatched);
        assert_eq!(stale[0].current_attempt, 1);
    }
}
