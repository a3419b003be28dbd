// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::reference::{Account, Platform, Proxy};
use crate::domain::repositories::reference_repository::ReferenceRepository;
use crate::domain::repositories::task_repository::RepositoryError;
use crate::infrastructure::database::entities::{
    account as account_entity, platform as platform_entity, proxy as proxy_entity,
};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter, Set,
};
use std::sync::Arc;

/// 平台、账号与代理等参考数据的仓库实现
#[derive(Clone)]
pub struct ReferenceRepositoryImpl {
    db: Arc<DatabaseConnection>,
}

impl ReferenceRepositoryImpl {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl TryFrom<platform_entity::Model> for Platform {
    type Error = RepositoryError;

    fn try_from(model: platform_entity::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            key: model.key,
            name: model.name,
            task_types: serde_json::from_value(model.task_types)?,
            url_template: model.url_template,
            result_selector: model.result_selector,
            is_active: model.is_active,
        })
    }
}

impl From<account_entity::Model> for Account {
    fn from(model: account_entity::Model) -> Self {
        Self {
            id: model.id,
            label: model.label,
            platform_key: model.platform_key,
            is_active: model.is_active,
        }
    }
}

impl From<proxy_entity::Model> for Proxy {
    fn from(model: proxy_entity::Model) -> Self {
        Self {
            id: model.id,
            url: model.url,
            is_active: model.is_active,
        }
    }
}

#[async_trait]
impl ReferenceRepository for ReferenceRepositoryImpl {
    async fn create_platform(&self, platform: &Platform) -> Result<Platform, RepositoryError> {
        let model = platform_entity::ActiveModel {
            id: NotSet,
            key: Set(platform.key.clone()),
            name: Set(platform.name.clone()),
            task_types: Set(serde_json::to_value(&platform.task_types)?),
            url_template: Set(platform.url_template.clone()),
            result_selector: Set(platform.result_selector.clone()),
            is_active: Set(platform.is_active),
        };

        model.insert(self.db.as_ref()).await?.try_into()
    }

    async fn find_platform(&self, key: &str) -> Result<Option<Platform>, RepositoryError> {
        platform_entity::Entity::find()
            .filter(platform_entity::Column::Key.eq(key))
            .one(self.db.as_ref())
            .await?
            .map(Platform::try_from)
            .transpose()
    }

    async fn create_account(&self, account: &Account) -> Result<Account, RepositoryError> {
        let model = account_entity::ActiveModel {
            id: NotSet,
            label: Set(account.label.clone()),
            platform_key: Set(account.platform_key.clone()),
            is_active: Set(account.is_active),
        };

        Ok(model.insert(self.db.as_ref()).await?.into())
    }

    async fn find_account(&self, id: i64) -> Result<Option<Account>, RepositoryError> {
        let model = account_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(Into::into))
    }

    async fn create_proxy(&self, proxy: &Proxy) -> Result<Proxy, RepositoryError> {
        let model = proxy_entity::ActiveModel {
            id: NotSet,
            url: Set(proxy.url.clone()),
            is_active: Set(proxy.is_active),
        };

        Ok(model.insert(self.db.as_ref()).await?.into())
    }

    async fn find_proxy(&self, id: i64) -> Result<Option<Proxy>, RepositoryError> {
        let model = proxy_entity::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(Into::into))
    }
}
