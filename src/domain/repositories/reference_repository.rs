// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::reference::{Account, Platform, Proxy};
use crate::domain::repositories::task_repository::RepositoryError;
use async_trait::async_trait;

/// 引用数据仓库
///
/// 平台、账号与代理由外部维护，这里只做创建与查询
#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    async fn create_platform(&self, platform: &Platform) -> Result<Platform, RepositoryError>;
    async fn find_platform(&self, key: &str) -> Result<Option<Platform>, RepositoryError>;
    async fn create_account(&self, account: &Account) -> Result<Account, RepositoryError>;
    async fn find_account(&self, id: i64) -> Result<Option<Account>, RepositoryError>;
    async fn create_proxy(&self, proxy: &Proxy) -> Result<Proxy, RepositoryError>;
    async fn find_proxy(&self, id: i64) -> Result<Option<Proxy>, RepositoryError>;
}
