// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务执行锁
///
/// 同一任务ID在任意时刻至多存在一个未过期的锁。
/// 锁存储中保存的值为 `holder#version`，续期与释放都以该令牌做比较并设置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub task_id: Uuid,
    pub key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
}

impl Lock {
    /// 锁存储中的令牌值
    pub fn token(&self) -> String {
        format!("{}#{}", self.holder, self.version)
    }

    /// 是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
