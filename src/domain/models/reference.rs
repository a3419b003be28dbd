// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskType;
use serde::{Deserialize, Serialize};

/// 抓取平台
///
/// 页面解析规则以数据形式保存：URL模板与结果选择器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub id: i64,
    /// 任务配置中引用的唯一键
    pub key: String,
    pub name: String,
    /// 支持的任务类型
    pub task_types: Vec<TaskType>,
    /// 含 `{keyword}`、`{location}`、`{page}` 占位符的URL模板
    pub url_template: String,
    /// 结果条目的CSS选择器
    pub result_selector: String,
    pub is_active: bool,
}

impl Platform {
    /// 是否支持指定任务类型
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.task_types.contains(&task_type)
    }
}

/// 抓取账号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub label: String,
    pub platform_key: Option<String>,
    pub is_active: bool,
}

/// 代理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub url: String,
    pub is_active: bool,
}
