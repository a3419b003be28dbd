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
        // Reference data
        manager
            .create_table(
                Table::create()
                    .table(Platforms::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Platforms::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Platforms::Key).string().not_null().unique_key())
                    .col(ColumnDef::new(Platforms::Name).string().not_null())
                    .col(ColumnDef::new(Platforms::TaskTypes).json().not_null())
                    .col(ColumnDef::new(Platforms::UrlTemplate).string().not_null())
                    .col(ColumnDef::new(Platforms::ResultSelector).string().not_null())
                    .col(
                        ColumnDef::new(Platforms::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::Label).string().not_null())
                    .col(ColumnDef::new(Accounts::PlatformKey).string())
                    .col(
                        ColumnDef::new(Accounts::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Proxies::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Proxies::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Proxies::Url).string().not_null())
                    .col(
                        ColumnDef::new(Proxies::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        // Tasks
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tasks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tasks::Name).string().not_null())
                    .col(ColumnDef::new(Tasks::TaskType).string().not_null())
                    .col(ColumnDef::new(Tasks::Status).string().not_null())
                    .col(ColumnDef::new(Tasks::Config).json().not_null())
                    .col(ColumnDef::new(Tasks::WorkerPid).big_integer())
                    .col(ColumnDef::new(Tasks::RunId).string())
                    .col(ColumnDef::new(Tasks::Progress).json())
                    .col(ColumnDef::new(Tasks::LastOutcome).string())
                    .col(ColumnDef::new(Tasks::LastError).text())
                    .col(
                        ColumnDef::new(Tasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Tasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Tasks::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Tasks::FinishedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tasks_status")
                    .table(Tasks::Table)
                    .col(Tasks::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TaskResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TaskResults::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TaskResults::TaskId).big_integer().not_null())
                    .col(ColumnDef::new(TaskResults::RunId).string().not_null())
                    .col(ColumnDef::new(TaskResults::Payload).json().not_null())
                    .col(
                        ColumnDef::new(TaskResults::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_results_task")
                            .from(TaskResults::Table, TaskResults::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_results_run")
                    .table(TaskResults::Table)
                    .col(TaskResults::TaskId)
                    .col(TaskResults::RunId)
                    .to_owned(),
            )
            .await?;

        // Schedules
        manager
            .create_table(
                Table::create()
                    .table(Schedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Schedules::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Schedules::Name).string().not_null())
                    .col(ColumnDef::new(Schedules::Description).text())
                    .col(ColumnDef::new(Schedules::TaskType).string().not_null())
                    .col(ColumnDef::new(Schedules::TaskId).big_integer().not_null())
                    .col(ColumnDef::new(Schedules::TriggerType).string().not_null())
                    .col(ColumnDef::new(Schedules::CronExpression).string())
                    .col(ColumnDef::new(Schedules::RunAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Schedules::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Schedules::DependencyCondition)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Schedules::DependsOnTaskId).big_integer())
                    .col(
                        ColumnDef::new(Schedules::DelayMinutes)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Schedules::NextRunAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Schedules::LastRunAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Schedules::FireCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Schedules::LastError).text())
                    .col(
                        ColumnDef::new(Schedules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Schedules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_schedules_task")
                            .from(Schedules::Table, Schedules::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_schedules_active_next_run")
                    .table(Schedules::Table)
                    .col(Schedules::IsActive)
                    .col(Schedules::NextRunAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Schedules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Proxies::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Platforms::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Platforms {
    Table,
    Id,
    Key,
    Name,
    TaskTypes,
    UrlTemplate,
    ResultSelector,
    IsActive,
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    Label,
    PlatformKey,
    IsActive,
}

#[derive(DeriveIden)]
enum Proxies {
    Table,
    Id,
    Url,
    IsActive,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    Name,
    TaskType,
    Status,
    Config,
    WorkerPid,
    RunId,
    Progress,
    LastOutcome,
    LastError,
    CreatedAt,
    UpdatedAt,
    StartedAt,
    FinishedAt,
}

#[derive(DeriveIden)]
enum TaskResults {
    Table,
    Id,
    TaskId,
    RunId,
    Payload,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Schedules {
    Table,
    Id,
    Name,
    Description,
    TaskType,
    TaskId,
    TriggerType,
    CronExpression,
    RunAt,
    IsActive,
    DependencyCondition,
    DependsOnTaskId,
    DelayMinutes,
    NextRunAt,
    LastRunAt,
    FireCount,
    LastError,
    CreatedAt,
    UpdatedAt,
}
