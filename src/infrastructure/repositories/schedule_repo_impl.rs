// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::schedule::{NewSchedule, Schedule, ScheduleId};
use crate::domain::repositories::schedule_repository::ScheduleRepository;
use crate::domain::repositories::task_repository::RepositoryError;
use crate::infrastructure::database::entities::schedule as schedule_entity;
use crate::infrastructure::repositories::corrupt;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;

/// 调度仓库实现
#[derive(Clone)]
pub struct ScheduleRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl ScheduleRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<schedule_entity::Model> for Schedule {
    type Error = RepositoryError;

    fn try_from(model: schedule_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            name: model.name,
            description: model.description,
            task_type: model.task_type.parse().map_err(corrupt)?,
            task_id: model.task_id,
            trigger_type: model.trigger_type.parse().map_err(corrupt)?,
            cron_expression: model.cron_expression,
            run_at: model.run_at.map(|t| t.with_timezone(&Utc)),
            is_active: model.is_active,
            dependency_condition: model.dependency_condition.parse().map_err(corrupt)?,
            depends_on_task_id: model.depends_on_task_id,
            delay_minutes: u32::try_from(model.delay_minutes).map_err(corrupt)?,
            next_run_at: model.next_run_at.map(|t| t.with_timezone(&Utc)),
            last_run_at: model.last_run_at.map(|t| t.with_timezone(&Utc)),
            fire_count: u32::try_from(model.fire_count).map_err(corrupt)?,
            last_error: model.last_error,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

fn to_i32(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(corrupt)
}

#[async_trait]
impl ScheduleRepository for ScheduleRepositoryImpl {
    async fn create(&self, schedule: &NewSchedule) -> Result<Schedule, RepositoryError> {
        let now = Utc::now();
        let model = schedule_entity::ActiveModel {
            id: NotSet,
            name: Set(schedule.name.clone()),
            description: Set(schedule.description.clone()),
            task_type: Set(schedule.task_type.to_string()),
            task_id: Set(schedule.task_id),
            trigger_type: Set(schedule.trigger_type.to_string()),
            cron_expression: Set(schedule.cron_expression.clone()),
            run_at: Set(schedule.run_at.map(Into::into)),
            is_active: Set(schedule.is_active),
            dependency_condition: Set(schedule.dependency_condition.to_string()),
            depends_on_task_id: Set(schedule.depends_on_task_id),
            delay_minutes: Set(to_i32(schedule.delay_minutes)?),
            next_run_at: Set(schedule.next_run_at.map(Into::into)),
            last_run_at: Set(None),
            fire_count: Set(0),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let inserted = model.insert(self.db.as_ref()).await?;
        inserted.try_into()
    }

    async fn find_by_id(&self, id: ScheduleId) -> Result<Option<Schedule>, RepositoryError> {
        let model = schedule_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        model.map(Schedule::try_from).transpose()
    }

    async fn update(&self, schedule: &Schedule) -> Result<Schedule, RepositoryError> {
        let model = schedule_entity::ActiveModel {
            id: Set(schedule.id),
            name: Set(schedule.name.clone()),
            description: Set(schedule.description.clone()),
            task_type: Set(schedule.task_type.to_string()),
            task_id: Set(schedule.task_id),
            trigger_type: Set(schedule.trigger_type.to_string()),
            cron_expression: Set(schedule.cron_expression.clone()),
            run_at: Set(schedule.run_at.map(Into::into)),
            is_active: Set(schedule.is_active),
            dependency_condition: Set(schedule.dependency_condition.to_string()),
            depends_on_task_id: Set(schedule.depends_on_task_id),
            delay_minutes: Set(to_i32(schedule.delay_minutes)?),
            next_run_at: Set(schedule.next_run_at.map(Into::into)),
            last_run_at: Set(schedule.last_run_at.map(Into::into)),
            fire_count: Set(to_i32(schedule.fire_count)?),
            last_error: Set(schedule.last_error.clone()),
            created_at: Set(schedule.created_at.into()),
            updated_at: Set(schedule.updated_at.into()),
        };

        match model.update(self.db.as_ref()).await {
            Ok(updated) => updated.try_into(),
            Err(DbErr::RecordNotUpdated) => Err(RepositoryError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: ScheduleId) -> Result<bool, RepositoryError> {
        let result = schedule_entity::Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn list(&self) -> Result<Vec<Schedule>, RepositoryError> {
        schedule_entity::Entity::find()
            .order_by_asc(schedule_entity::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Schedule::try_from)
            .collect()
    }

    async fn find_active(&self) -> Result<Vec<Schedule>, RepositoryError> {
        schedule_entity::Entity::find()
            .filter(schedule_entity::Column::IsActive.eq(true))
            .order_by_asc(schedule_entity::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Schedule::try_from)
            .collect()
    }
}
