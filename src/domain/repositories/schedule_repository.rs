// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::schedule::{NewSchedule, Schedule, ScheduleId};
use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;

/// 调度仓库特质
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 创建调度
    async fn create(&self, schedule: &NewSchedule) -> Result<Schedule, RepositoryError>;
    /// 根据ID查找
    async fn find_by_id(&self, id: ScheduleId) -> Result<Option<Schedule>, RepositoryError>;
    /// 整体更新
    async fn update(&self, schedule: &Schedule) -> Result<Schedule, RepositoryError>;
    /// 删除，返回是否存在
    async fn delete(&self, id: ScheduleId) -> Result<bool, RepositoryError>;
    /// 列出全部调度
    async fn list(&self) -> Result<Vec<Schedule>, RepositoryError>;
    /// 列出启用中的调度
    async fn find_active(&self) -> Result<Vec<Schedule>, RepositoryError>;
}
