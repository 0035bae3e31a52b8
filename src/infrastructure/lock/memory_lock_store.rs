// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::lock_store::{LockStore, LockStoreError};
use crate::utils::clock::{to_chrono, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct LockValue {
    value: String,
    expires_at: DateTime<Utc>,
}

/// 内存锁存储
///
/// 以 DashMap 条目锁保证条件写入的原子性，过期判断读取注入的时钟
pub struct InMemoryLockStore {
    entries: DashMap<String, LockValue>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let now = self.clock.now();
        let fresh = LockValue {
            value: value.to_string(),
            expires_at: now + to_chrono(ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn compare_and_renew(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<bool, LockStoreError> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut current) if current.value == expected && current.expires_at > now => {
                current.value = new_value.to_string();
                current.expires_at = now + to_chrono(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockStoreError> {
        let now = self.clock.now();
        let removed = self
            .entries
            .remove_if(key, |_, current| {
                current.value == expected && current.expires_at > now
            });
        Ok(removed.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockStoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|current| current.expires_at > now)
            .map(|current| current.value.clone()))
    }
}
