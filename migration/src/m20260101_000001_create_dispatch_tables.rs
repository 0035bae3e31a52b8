// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DispatchTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DispatchTasks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DispatchTasks::TenantId).uuid().not_null())
                    .col(ColumnDef::new(DispatchTasks::TaskType).string().not_null())
                    .col(ColumnDef::new(DispatchTasks::Callback).json().not_null())
                    .col(ColumnDef::new(DispatchTasks::Priority).string().not_null())
                    .col(
                        ColumnDef::new(DispatchTasks::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(ColumnDef::new(DispatchTasks::RetryIntervals).json().not_null())
                    .col(ColumnDef::new(DispatchTasks::TimeoutSecs).big_integer())
                    .col(
                        ColumnDef::new(DispatchTasks::CurrentAttempt)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DispatchTasks::Status).string().not_null())
                    .col(
                        ColumnDef::new(DispatchTasks::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DispatchTasks::NextExecuteAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(DispatchTasks::ExecutedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(DispatchTasks::CompletedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(DispatchTasks::ExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(DispatchTasks::LastError).text())
                    .col(ColumnDef::new(DispatchTasks::DeadLetterReason).string())
                    .col(
                        ColumnDef::new(DispatchTasks::LastSequence)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DispatchTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DispatchTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dispatch_tasks_status_next_execute")
                    .table(DispatchTasks::Table)
                    .col(DispatchTasks::Status)
                    .col(DispatchTasks::NextExecuteAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dispatch_tasks_tenant")
                    .table(DispatchTasks::Table)
                    .col(DispatchTasks::TenantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DispatchExecutionRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DispatchExecutionRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DispatchExecutionRecords::TaskId).uuid().not_null())
                    .col(
                        ColumnDef::new(DispatchExecutionRecords::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DispatchExecutionRecords::Attempt).integer().not_null())
                    .col(ColumnDef::new(DispatchExecutionRecords::WorkerId).string().not_null())
                    .col(
                        ColumnDef::new(DispatchExecutionRecords::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DispatchExecutionRecords::DurationMs)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DispatchExecutionRecords::Outcome).string().not_null())
                    .col(ColumnDef::new(DispatchExecutionRecords::HttpStatus).integer())
                    .col(ColumnDef::new(DispatchExecutionRecords::ErrorMessage).text())
                    .col(ColumnDef::new(DispatchExecutionRecords::ResponseBody).text())
                    .col(ColumnDef::new(DispatchExecutionRecords::TraceId).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_dispatch_execution_records_task")
                            .from(DispatchExecutionRecords::Table, DispatchExecutionRecords::TaskId)
                            .to(DispatchTasks::Table, DispatchTasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dispatch_execution_records_task_sequence")
                    .table(DispatchExecutionRecords::Table)
                    .col(DispatchExecutionRecords::TaskId)
                    .col(DispatchExecutionRecords::Sequence)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(DispatchExecutionRecords::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(DispatchTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DispatchTasks {
    Table,
    Id,
    TenantId,
    TaskType,
    Callback,
    Priority,
    MaxAttempts,
    RetryIntervals,
    TimeoutSecs,
    CurrentAttempt,
    Status,
    ScheduledAt,
    NextExecuteAt,
    ExecutedAt,
    CompletedAt,
    ExpiresAt,
    LastError,
    DeadLetterReason,
    LastSequence,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DispatchExecutionRecords {
    Table,
    Id,
    TaskId,
    Sequence,
    Attempt,
    WorkerId,
    StartedAt,
    DurationMs,
    Outcome,
    HttpStatus,
    ErrorMessage,
    ResponseBody,
    TraceId,
}
