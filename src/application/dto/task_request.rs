// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{NewTask, TaskConfig, TaskType};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

/// 创建任务请求
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    pub task_type: TaskType,
    #[validate(length(min = 1, message = "platform required"))]
    pub platform: String,
    #[validate(length(min = 1, message = "keywords required"))]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_max_pages")]
    #[validate(range(min = 1, max = 1000, message = "max_pages must be between 1 and 1000"))]
    pub max_pages: u32,
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 32, message = "concurrency must be between 1 and 32"))]
    pub concurrency: u32,
    #[serde(default = "default_delay_ms")]
    #[validate(range(max = 60000, message = "delay_ms must not exceed 60000"))]
    pub delay_ms: u64,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub proxy_id: Option<i64>,
}

fn default_max_pages() -> u32 {
    10
}

fn default_concurrency() -> u32 {
    1
}

fn default_delay_ms() -> u64 {
    1000
}

impl CreateTaskRequest {
    /// 收集全部字段级违规信息
    ///
    /// 引用完整性（平台、账号、代理是否存在）由编排器继续检查
    pub fn violations(&self) -> Vec<String> {
        let mut messages = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => messages_of(&errors),
        };

        if self.keywords.iter().any(|keyword| keyword.trim().is_empty()) {
            messages.push("keywords must not be blank".to_string());
        }
        messages
    }

    /// 转换为待创建的任务
    pub fn into_new_task(self) -> NewTask {
        NewTask {
            name: self.name.trim().to_string(),
            task_type: self.task_type,
            config: TaskConfig {
                platform: self.platform,
                keywords: self
                    .keywords
                    .into_iter()
                    .map(|keyword| keyword.trim().to_string())
                    .collect(),
                location: self.location.filter(|location| !location.trim().is_empty()),
                max_pages: self.max_pages,
                concurrency: self.concurrency,
                delay_ms: self.delay_ms,
                account_id: self.account_id,
                proxy_id: self.proxy_id,
            },
        }
    }
}

/// 按字段名排序展开校验错误，保证输出稳定
pub(crate) fn messages_of(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| match &error.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid ({})", field, error.code),
            })
        })
        .collect()
}
