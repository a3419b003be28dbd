// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{NewTask, Task, TaskId};
use crate::domain::models::task_result::Page;
use async_trait::async_trait;
use sea_orm::DbErr;
use thiserror::Error;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    /// 记录未找到
    #[error("Record not found")]
    NotFound,
    /// 存储的数据无法解析
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    /// JSON 字段序列化失败
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 任务仓库特质
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务并分配ID
    async fn create(&self, task: &NewTask) -> Result<Task, RepositoryError>;
    /// 根据ID查找任务
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;
    /// 整体更新任务
    async fn update(&self, task: &Task) -> Result<Task, RepositoryError>;
    /// 分页列出任务，页码从1开始
    async fn list(&self, page: u64, size: u64) -> Result<Page<Task>, RepositoryError>;

    /// 查找处于运行中或暂停状态的任务
    ///
    /// 控制器重启后用于清理失去工作进程的任务
    async fn find_active(&self) -> Result<Vec<Task>, RepositoryError>;
}
