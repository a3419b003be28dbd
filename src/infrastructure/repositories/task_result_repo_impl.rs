// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use crate::domain::models::task_result::{Page, TaskResult};
use crate::domain::repositories::task_repository::RepositoryError;
use crate::domain::repositories::task_result_repository::TaskResultRepository;
use crate::infrastructure::database::entities::task_result as result_entity;
use crate::infrastructure::repositories::corrupt;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, NotSet, PaginatorTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

/// 单条 INSERT 的最大行数
const INSERT_CHUNK: usize = 200;

/// 任务结果仓库实现
#[derive(Clone)]
pub struct TaskResultRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl TaskResultRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<result_entity::Model> for TaskResult {
    type Error = RepositoryError;

    fn try_from(model: result_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            task_id: model.task_id,
            run_id: Uuid::parse_str(&model.run_id).map_err(corrupt)?,
            payload: model.payload,
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl TaskResultRepository for TaskResultRepositoryImpl {
    async fn insert_batch(
        &self,
        task_id: TaskId,
        run_id: Uuid,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, RepositoryError> {
        if payloads.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let run_id = run_id.to_string();
        let count = payloads.len() as u64;

        // All rows of a run land together or not at all.
        let txn = self.db.begin().await?;
        for chunk in payloads.chunks(INSERT_CHUNK) {
            let models = chunk.iter().map(|payload| result_entity::ActiveModel {
                id: NotSet,
                task_id: Set(task_id),
                run_id: Set(run_id.clone()),
                payload: Set(payload.clone()),
                created_at: Set(now.into()),
            });
            result_entity::Entity::insert_many(models).exec(&txn).await?;
        }
        txn.commit().await?;

        Ok(count)
    }

    async fn find_by_run(
        &self,
        task_id: TaskId,
        run_id: Uuid,
        page: u64,
        size: u64,
    ) -> Result<Page<TaskResult>, RepositoryError> {
        let page = page.max(1);
        let size = size.max(1);
        let paginator = result_entity::Entity::find()
            .filter(result_entity::Column::TaskId.eq(task_id))
            .filter(result_entity::Column::RunId.eq(run_id.to_string()))
            .order_by_asc(result_entity::Column::Id)
            .paginate(self.db.as_ref(), size);

        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(TaskResult::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page,
            size,
            total,
        })
    }
}
