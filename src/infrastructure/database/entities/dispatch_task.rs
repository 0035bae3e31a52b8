// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "dispatch_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub task_type: String,
    pub callback: Json,
    pub priority: String,
    pub max_attempts: i32,
    pub retry_intervals: Json,
    pub timeout_secs: Option<i64>,
    pub current_attempt: i32,
    pub status: String,
    pub scheduled_at: ChronoDateTimeWithTimeZone,
    pub next_execute_at: Option<ChronoDateTimeWithTimeZone>,
    pub executed_at: Option<ChronoDateTimeWithTimeZone>,
    pub completed_at: Option<ChronoDateTimeWithTimeZone>,
    pub expires_at: Option<ChronoDateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub dead_letter_reason: Option<String>,
    /// 最近分配的执行记录序号
    pub last_sequence: i64,
    pub created_at: ChronoDateTimeWithTimeZone,
    pub updated_at: ChronoDateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::dispatch_execution_record::Entity")]
    ExecutionRecords,
}

impl Related<super::dispatch_execution_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExecutionRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
