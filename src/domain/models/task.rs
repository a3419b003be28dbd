// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::progress::ProgressSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// 任务ID，由持久层在创建时分配
pub type TaskId = i64;

/// 任务实体
///
/// 一个抓取工作单元。状态只会通过监督器上报的事件或显式的
/// 停止/暂停请求发生变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 任务唯一标识符
    pub id: TaskId,
    /// 任务名称
    pub name: String,
    /// 任务类型
    pub task_type: TaskType,
    /// 当前状态
    pub status: TaskStatus,
    /// 抓取配置
    pub config: TaskConfig,
    /// 工作进程ID，仅在运行期间存在
    pub worker_pid: Option<u32>,
    /// 当前（或最近一次）运行的标识，用于丢弃过期事件
    pub run_id: Option<Uuid>,
    /// 最新进度快照
    pub progress: Option<ProgressSnapshot>,
    /// 最近一次运行的终态结果，依赖条件以此为准
    pub last_outcome: Option<TaskStatus>,
    /// 最近一次观察到的错误
    pub last_error: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
    /// 最近一次开始时间
    pub started_at: Option<DateTime<Utc>>,
    /// 最近一次进入终态的时间
    pub finished_at: Option<DateTime<Utc>>,
}

/// 待创建的任务
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub config: TaskConfig,
}

/// 任务抓取配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// 目标平台标识
    pub platform: String,
    /// 搜索关键词
    pub keywords: Vec<String>,
    /// 目标地区
    #[serde(default)]
    pub location: Option<String>,
    /// 每个关键词最多抓取的页数
    pub max_pages: u32,
    /// 并发页数
    pub concurrency: u32,
    /// 批次之间的间隔（毫秒）
    pub delay_ms: u64,
    /// 关联账号
    #[serde(default)]
    pub account_id: Option<i64>,
    /// 关联代理
    #[serde(default)]
    pub proxy_id: Option<i64>,
}

impl TaskConfig {
    /// 本次运行的页数上限
    pub fn total_pages(&self) -> u32 {
        (self.keywords.len() as u32).saturating_mul(self.max_pages)
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// 目录站点抓取
    #[default]
    DirectoryScrape,
    /// 搜索引擎结果抓取
    SearchEngineScrape,
    /// 邮箱提取
    EmailExtraction,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskType::DirectoryScrape => write!(f, "directory_scrape"),
            TaskType::SearchEngineScrape => write!(f, "search_engine_scrape"),
            TaskType::EmailExtraction => write!(f, "email_extraction"),
        }
    }
}

impl FromStr for TaskType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory_scrape" => Ok(TaskType::DirectoryScrape),
            "search_engine_scrape" => Ok(TaskType::SearchEngineScrape),
            "email_extraction" => Ok(TaskType::EmailExtraction),
            other => Err(DomainError::UnknownValue {
                kind: "task type",
                value: other.to_string(),
            }),
        }
    }
}

/// 任务状态
///
/// Pending → InProgress ⇄ Paused → Completed/Failed，停止会回到 Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 是否持有工作进程
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Paused)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Paused => write!(f, "paused"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(DomainError::UnknownValue {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 不允许的状态转换
    #[error("cannot {action} a task that is {from}")]
    InvalidStateTransition {
        from: TaskStatus,
        action: &'static str,
    },

    /// 无法识别的枚举值
    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

impl Task {
    /// 是否允许发起新的运行
    pub fn can_start(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed
        )
    }

    /// 事件是否属于当前运行
    pub fn is_current_run(&self, run_id: Uuid) -> bool {
        self.run_id == Some(run_id)
    }

    /// 监督器确认工作进程已启动
    ///
    /// 同一运行的重复确认只刷新进程ID
    pub fn start(
        &mut self,
        run_id: Uuid,
        pid: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_active() && self.is_current_run(run_id) {
            self.worker_pid = pid;
            self.updated_at = now;
            return Ok(());
        }

        if !self.can_start() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                action: "start",
            });
        }

        self.status = TaskStatus::InProgress;
        self.run_id = Some(run_id);
        self.worker_pid = pid;
        self.progress = None;
        self.last_error = None;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// 覆盖进度快照
    ///
    /// 返回 `false` 表示事件已过期或任务已进入终态
    pub fn record_progress(
        &mut self,
        run_id: Uuid,
        snapshot: ProgressSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.is_active() || !self.is_current_run(run_id) {
            return false;
        }

        self.progress = Some(snapshot);
        self.updated_at = now;
        true
    }

    /// 标记完成
    pub fn complete(&mut self, run_id: Uuid, now: DateTime<Utc>) -> bool {
        self.finish(run_id, TaskStatus::Completed, None, now)
    }

    /// 标记失败并附带最后的错误
    pub fn fail(&mut self, run_id: Uuid, error: impl Into<String>, now: DateTime<Utc>) -> bool {
        self.finish(run_id, TaskStatus::Failed, Some(error.into()), now)
    }

    fn finish(
        &mut self,
        run_id: Uuid,
        outcome: TaskStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.status.is_active() || !self.is_current_run(run_id) {
            return false;
        }

        self.status = outcome;
        self.last_outcome = Some(outcome);
        self.worker_pid = None;
        if error.is_some() {
            self.last_error = error;
        }
        self.finished_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 记录一次运行期崩溃，等待监督器重启
    pub fn record_crash(&mut self, run_id: Uuid, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.status.is_active() || !self.is_current_run(run_id) {
            return false;
        }

        self.worker_pid = None;
        self.last_error = Some(reason.into());
        self.updated_at = now;
        true
    }

    /// 记录重启后的新进程
    ///
    /// 重启后的进程从头执行，暂停状态随之解除
    pub fn record_restart(&mut self, run_id: Uuid, pid: Option<u32>, now: DateTime<Utc>) -> bool {
        if !self.status.is_active() || !self.is_current_run(run_id) {
            return false;
        }

        self.status = TaskStatus::InProgress;
        self.worker_pid = pid;
        self.updated_at = now;
        true
    }

    /// 暂停，保留工作进程ID以便恢复
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::InProgress => {
                self.status = TaskStatus::Paused;
                self.updated_at = now;
                Ok(())
            }
            TaskStatus::Paused => Ok(()),
            from => Err(DomainError::InvalidStateTransition {
                from,
                action: "pause",
            }),
        }
    }

    /// 从暂停中恢复
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.status {
            TaskStatus::Paused => {
                self.status = TaskStatus::InProgress;
                self.updated_at = now;
                Ok(())
            }
            TaskStatus::InProgress => Ok(()),
            from => Err(DomainError::InvalidStateTransition {
                from,
                action: "resume",
            }),
        }
    }

    /// 显式停止后回到待处理状态
    ///
    /// 停止不是终态，`last_outcome` 保持不变
    pub fn reset_after_stop(&mut self, note: impl Into<String>, now: DateTime<Utc>) {
        if self.status.is_active() {
            self.status = TaskStatus::Pending;
            self.last_error = Some(note.into());
        }
        self.worker_pid = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
#[path = "task_test.rs"]
mod tests;
