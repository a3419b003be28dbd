// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::{DomainError, Task, TaskId, TaskStatus, TaskType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 调度ID
pub type ScheduleId = i64;

/// 调度规则
///
/// 绑定到唯一一个任务。调度器只修改下次运行时间与触发记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub description: Option<String>,
    /// 目标任务类型
    pub task_type: TaskType,
    /// 目标任务
    pub task_id: TaskId,
    pub trigger_type: TriggerType,
    /// 仅 CRON 类型使用
    pub cron_expression: Option<String>,
    /// 仅 ONE_TIME 类型使用
    pub run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub dependency_condition: DependencyCondition,
    /// 前置任务，依赖条件为 NONE 时忽略
    pub depends_on_task_id: Option<TaskId>,
    /// 前置任务结束后需要等待的分钟数
    pub delay_minutes: u32,
    /// 计算出的下次运行时间
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub fire_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待创建的调度
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchedule {
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub task_id: TaskId,
    pub trigger_type: TriggerType,
    pub cron_expression: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub dependency_condition: DependencyCondition,
    pub depends_on_task_id: Option<TaskId>,
    pub delay_minutes: u32,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// 触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Cron,
    OneTime,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TriggerType::Cron => write!(f, "CRON"),
            TriggerType::OneTime => write!(f, "ONE_TIME"),
        }
    }
}

impl FromStr for TriggerType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRON" => Ok(TriggerType::Cron),
            "ONE_TIME" => Ok(TriggerType::OneTime),
            other => Err(DomainError::UnknownValue {
                kind: "trigger type",
                value: other.to_string(),
            }),
        }
    }
}

/// 依赖条件
///
/// 根据前置任务最近一次运行的终态决定是否触发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyCondition {
    #[default]
    None,
    OnSuccess,
    OnFailure,
    /// 不论前置任务成功或失败都会触发，但从未结束过的前置任务会阻止触发
    Always,
}

impl DependencyCondition {
    /// 前置任务最近一次终态是否满足条件
    ///
    /// ALWAYS 不关心成功与否，但要求前置任务至少结束过一次
    pub fn is_satisfied_by(&self, last_outcome: Option<TaskStatus>) -> bool {
        match self {
            DependencyCondition::None => true,
            DependencyCondition::OnSuccess => last_outcome == Some(TaskStatus::Completed),
            DependencyCondition::OnFailure => last_outcome == Some(TaskStatus::Failed),
            DependencyCondition::Always => last_outcome.is_some_and(|status| status.is_terminal()),
        }
    }

    /// 是否需要前置任务
    pub fn requires_prerequisite(&self) -> bool {
        !matches!(self, DependencyCondition::None)
    }
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DependencyCondition::None => write!(f, "NONE"),
            DependencyCondition::OnSuccess => write!(f, "ON_SUCCESS"),
            DependencyCondition::OnFailure => write!(f, "ON_FAILURE"),
            DependencyCondition::Always => write!(f, "ALWAYS"),
        }
    }
}

impl FromStr for DependencyCondition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(DependencyCondition::None),
            "ON_SUCCESS" => Ok(DependencyCondition::OnSuccess),
            "ON_FAILURE" => Ok(DependencyCondition::OnFailure),
            "ALWAYS" => Ok(DependencyCondition::Always),
            other => Err(DomainError::UnknownValue {
                kind: "dependency condition",
                value: other.to_string(),
            }),
        }
    }
}

impl Schedule {
    /// 等待时长
    pub fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.delay_minutes))
    }

    /// 计划时间与延迟都满足后的最早触发时间
    ///
    /// 无依赖时为 `next_run_at + delay`；有依赖时为
    /// `max(next_run_at, 前置任务结束时间 + delay)`，前置任务从未结束则返回 `None`
    pub fn due_at(&self, prerequisite: Option<&Task>) -> Option<DateTime<Utc>> {
        let next_run = self.next_run_at?;

        if !self.dependency_condition.requires_prerequisite() {
            return Some(next_run + self.delay());
        }

        let finished_at = prerequisite.and_then(|task| task.finished_at)?;
        Some(next_run.max(finished_at + self.delay()))
    }

    /// 记录一次成功触发
    ///
    /// 一次性调度随即停用，周期调度使用调用方给出的下次时间
    pub fn record_fire(&mut self, now: DateTime<Utc>, next_run_at: Option<DateTime<Utc>>) {
        self.last_run_at = Some(now);
        self.fire_count += 1;
        self.last_error = None;
        self.updated_at = now;

        match self.trigger_type {
            TriggerType::OneTime => {
                self.is_active = false;
                self.next_run_at = None;
            }
            TriggerType::Cron => self.next_run_at = next_run_at,
        }
    }

    /// 本轮跳过或触发失败
    ///
    /// 周期调度推进到下一次自然触发时间，一次性调度保持不变以便下轮重新评估
    pub fn record_miss(
        &mut self,
        now: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) {
        if self.trigger_type == TriggerType::Cron {
            self.next_run_at = next_run_at;
        }
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
