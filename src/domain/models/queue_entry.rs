// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 队列条目
///
/// `delivery_attempts` 是代理层面的投递计数，与任务的重试尝试次数无关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub queue: String,
    pub priority_weight: u32,
    pub visible_at: DateTime<Utc>,
    pub delivery_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// 创建新条目，`visible_at` 由代理在入队时根据延迟设置
    pub fn new(task_id: Uuid, queue: impl Into<String>, priority_weight: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            queue: queue.into(),
            priority_weight,
            visible_at: now,
            delivery_attempts: 0,
            enqueued_at: now,
        }
    }
}

/// 确认句柄，标识一次具体的投递
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckHandle(pub String);

impl AckHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AckHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 一次出队投递
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub entry: QueueEntry,
    pub handle: AckHandle,
}
