// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::task_request::messages_of;
use crate::domain::models::schedule::{DependencyCondition, TriggerType};
use crate::domain::models::task::{TaskId, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 调度定义请求，创建与整体更新共用
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ScheduleRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub task_type: TaskType,
    pub task_id: TaskId,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub dependency_condition: DependencyCondition,
    #[serde(default)]
    pub depends_on_task_id: Option<TaskId>,
    #[serde(default)]
    #[validate(range(max = 10080, message = "delay_minutes must not exceed 10080"))]
    pub delay_minutes: u32,
}

fn default_active() -> bool {
    true
}

impl ScheduleRequest {
    /// 不依赖外部数据的违规信息
    pub fn violations(&self) -> Vec<String> {
        let mut messages = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => messages_of(&errors),
        };

        match self.trigger_type {
            TriggerType::Cron if self.cron_expression.is_none() => {
                messages.push("cron_expression required for CRON".to_string());
            }
            TriggerType::OneTime if self.cron_expression.is_some() => {
                messages.push("cron_expression only applies to CRON".to_string());
            }
            _ => {}
        }

        match (self.dependency_condition.requires_prerequisite(), self.depends_on_task_id) {
            (true, None) => messages.push(format!(
                "depends_on_task_id required for {}",
                self.dependency_condition
            )),
            (_, Some(prerequisite)) if prerequisite == self.task_id => {
                messages.push("a schedule cannot depend on its own task".to_string());
            }
            _ => {}
        }
        messages
    }
}
