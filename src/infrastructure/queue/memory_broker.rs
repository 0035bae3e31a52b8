// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::queue_entry::{AckHandle, Delivery, QueueEntry};
use crate::queue::broker::{QueueBroker, QueueError, QueueStats};
use crate::utils::clock::{to_chrono, until, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type ReadyKey = (DateTime<Utc>, u64);

struct InFlight {
    entry: QueueEntry,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct BrokerState {
    ready: HashMap<String, BTreeMap<ReadyKey, QueueEntry>>,
    in_flight: HashMap<AckHandle, InFlight>,
    seq: u64,
}

impl BrokerState {
    fn push(&mut self, entry: QueueEntry) {
        self.seq += 1;
        let key = (entry.visible_at, self.seq);
        self.ready
            .entry(entry.queue.clone())
            .or_default()
            .insert(key, entry);
    }

    /// 超过可见性超时仍未确认的投递重新变为可见
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<AckHandle> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(h, _)| h.clone())
            .collect();

        for handle in expired {
            if let Some(mut flight) = self.in_flight.remove(&handle) {
                debug!(task_id = %flight.entry.task_id, "Visibility timeout elapsed, redelivering");
                flight.entry.visible_at = now;
                self.push(flight.entry);
            }
        }
    }
}

/// 内存队列代理
///
/// 单进程内的开发与测试实现：延迟可见、可见性超时重投以及投递计数
pub struct InMemoryQueueBroker {
    state: Mutex<BrokerState>,
    clock: Arc<dyn Clock>,
    visibility_timeout: Duration,
}

impl InMemoryQueueBroker {
    /// 创建新的内存队列代理
    ///
    /// # 参数
    ///
    /// * `clock` - 时钟
    /// * `visibility_timeout` - 出队后未确认多久重新可见
    pub fn new(clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            clock,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl QueueBroker for InMemoryQueueBroker {
    async fn enqueue(&self, mut entry: QueueEntry, delay: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        entry.visible_at = now + to_chrono(delay);
        self.state.lock().push(entry);
        Ok(())
    }

    async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.reclaim_expired(now);

        for queue in queues {
            let Some(ready) = state.ready.get_mut(queue) else {
                continue;
            };

            let key = match ready.first_key_value() {
                Some((key, _)) if key.0 <= now => *key,
                _ => continue,
            };

            if let Some(mut entry) = ready.remove(&key) {
                entry.delivery_attempts += 1;
                let handle = AckHandle::new();
                state.in_flight.insert(
                    handle.clone(),
                    InFlight {
                        entry: entry.clone(),
                        deadline: now + to_chrono(self.visibility_timeout),
                    },
                );
                return Ok(Some(Delivery { entry, handle }));
            }
        }

        Ok(None)
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        match self.state.lock().in_flight.remove(handle) {
            Some(_) => Ok(()),
            None => Err(QueueError::UnknownHandle(handle.clone())),
        }
    }

    async fn nack(&self, handle: &AckHandle, requeue_delay: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.in_flight.remove(handle) {
            Some(mut flight) => {
                flight.entry.visible_at = now + to_chrono(requeue_delay);
                state.push(flight.entry);
                Ok(())
            }
            None => Err(QueueError::UnknownHandle(handle.clone())),
        }
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let now = self.clock.now();
        let state = self.state.lock();

        let mut stats = QueueStats::default();
        if let Some(ready) = state.ready.get(queue) {
            for (visible_at, _) in ready.keys() {
                if *visible_at <= now {
                    stats.ready += 1;
                } else {
                    stats.delayed += 1;
                }
            }
            if let Some(((oldest, _), _)) = ready.first_key_value() {
                if *oldest <= now {
                    stats.oldest_ready_age = until(*oldest, now);
                }
            }
        }
        stats.in_flight = state
            .in_flight
            .values()
            .filter(|f| f.entry.queue == queue)
            .count() as u64;

        Ok(stats)
    }
}
