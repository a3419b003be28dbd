// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{NewTask, Task, TaskId, TaskStatus};
use crate::domain::models::task_result::Page;
use crate::domain::repositories::task_repository::{RepositoryError, TaskRepository};
use crate::infrastructure::database::entities::task as task_entity;
use crate::infrastructure::repositories::corrupt;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

/// 任务仓库实现
///
/// 基于SeaORM实现的任务数据访问层
#[derive(Clone)]
pub struct TaskRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl TaskRepositoryImpl {
    /// 创建新的任务仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    ///
    /// # 返回值
    ///
    /// 返回新的任务仓库实例
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<task_entity::Model> for Task {
    type Error = RepositoryError;

    fn try_from(model: task_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            name: model.name,
            task_type: model.task_type.parse().map_err(corrupt)?,
            status: model.status.parse().map_err(corrupt)?,
            config: serde_json::from_value(model.config)?,
            worker_pid: model.worker_pid.and_then(|pid| u32::try_from(pid).ok()),
            run_id: model
                .run_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(corrupt)?,
            progress: model.progress.map(serde_json::from_value).transpose()?,
            last_outcome: model
                .last_outcome
                .as_deref()
                .map(str::parse::<TaskStatus>)
                .transpose()
                .map_err(corrupt)?,
            last_error: model.last_error,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
            started_at: model.started_at.map(|t| t.with_timezone(&Utc)),
            finished_at: model.finished_at.map(|t| t.with_timezone(&Utc)),
        })
    }
}

fn to_active_model(task: &Task) -> Result<task_entity::ActiveModel, RepositoryError> {
    Ok(task_entity::ActiveModel {
        id: Set(task.id),
        name: Set(task.name.clone()),
        task_type: Set(task.task_type.to_string()),
        status: Set(task.status.to_string()),
        config: Set(serde_json::to_value(&task.config)?),
        worker_pid: Set(task.worker_pid.map(i64::from)),
        run_id: Set(task.run_id.map(|id| id.to_string())),
        progress: Set(task.progress.as_ref().map(serde_json::to_value).transpose()?),
        last_outcome: Set(task.last_outcome.map(|s| s.to_string())),
        last_error: Set(task.last_error.clone()),
        created_at: Set(task.created_at.into()),
        updated_at: Set(task.updated_at.into()),
        started_at: Set(task.started_at.map(Into::into)),
        finished_at: Set(task.finished_at.map(Into::into)),
    })
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn create(&self, task: &NewTask) -> Result<Task, RepositoryError> {
        let now = Utc::now();
        let model = task_entity::ActiveModel {
            id: NotSet,
            name: Set(task.name.clone()),
            task_type: Set(task.task_type.to_string()),
            status: Set(TaskStatus::Pending.to_string()),
            config: Set(serde_json::to_value(&task.config)?),
            worker_pid: Set(None),
            run_id: Set(None),
            progress: Set(None),
            last_outcome: Set(None),
            last_error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            started_at: Set(None),
            finished_at: Set(None),
        };

        let inserted = model.insert(self.db.as_ref()).await?;
        inserted.try_into()
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        let model = task_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;

        model.map(Task::try_from).transpose()
    }

    async fn update(&self, task: &Task) -> Result<Task, RepositoryError> {
        let model = to_active_model(task)?;

        match model.update(self.db.as_ref()).await {
            Ok(updated) => updated.try_into(),
            Err(DbErr::RecordNotUpdated) => Err(RepositoryError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, page: u64, size: u64) -> Result<Page<Task>, RepositoryError> {
        let page = page.max(1);
        let size = size.max(1);
        let paginator = task_entity::Entity::find()
            .order_by_asc(task_entity::Column::Id)
            .paginate(self.db.as_ref(), size);

        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page,
            size,
            total,
        })
    }

    async fn find_active(&self) -> Result<Vec<Task>, RepositoryError> {
        let active = [
            TaskStatus::InProgress.to_string(),
            TaskStatus::Paused.to_string(),
        ];

        task_entity::Entity::find()
            .filter(task_entity::Column::Status.is_in(active))
            .order_by_asc(task_entity::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }
}
