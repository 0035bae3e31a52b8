// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm_migration::prelude::*;

/// 派发表迁移命令行
///
/// `dispatchrs` 启动时会自动执行 `up`；该入口用于手动执行 `status`、`down`、`fresh`，
/// 连接串读取 `DATABASE_URL`
#[async_std::main]
async fn main() {
    cli::run_cli(migration::Migrator).await;
}
