// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use crate::domain::models::task_result::{Page, TaskResult};
use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;
use uuid::Uuid;

/// 任务结果仓库特质
#[async_trait]
pub trait TaskResultRepository: Send + Sync {
    /// 批量写入一次运行的结果，返回写入条数
    async fn insert_batch(
        &self,
        task_id: TaskId,
        run_id: Uuid,
        payloads: Vec<serde_json::Value>,
    ) -> Result<u64, RepositoryError>;

    /// 分页读取某次运行的结果，页码从1开始
    async fn find_by_run(
        &self,
        task_id: TaskId,
        run_id: Uuid,
        page: u64,
        size: u64,
    ) -> Result<Page<TaskResult>, RepositoryError>;
}
