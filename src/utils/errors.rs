// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::schedule::ScheduleId;
use crate::domain::models::task::{DomainError, TaskId, TaskStatus};
use crate::domain::repositories::task_repository::RepositoryError;
use crate::utils::retry_policy::is_transient_error;
use thiserror::Error;

/// IPC错误类型
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed IPC frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IPC channel closed")]
    ChannelClosed,
}

/// 监督器错误类型
///
/// 运行期崩溃与重启耗尽不会以错误形式返回，只会体现为事件和任务状态
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Task {0} already has a live worker")]
    AlreadyRunning(TaskId),

    #[error("Task {0} has no live worker")]
    NotRunning(TaskId),

    #[error("Worker for task {task_id} failed to start after {attempts} attempts: {last_error}")]
    StartupFailure {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Command channel to worker of task {0} is closed")]
    ChannelClosed(TaskId),
}

/// 编排器错误类型
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 任务配置校验失败，携带全部违反的约束
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("Cannot {action} task {task_id} while it is {status}")]
    InvalidState {
        task_id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Task {task_id} failed to start after {attempts} attempts: {last_error}")]
    StartupFailure {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("Supervisor error: {0}")]
    Supervisor(SupervisorError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<SupervisorError> for OrchestratorError {
    fn from(error: SupervisorError) -> Self {
        match error {
            SupervisorError::AlreadyRunning(task_id) => OrchestratorError::AlreadyRunning(task_id),
            SupervisorError::StartupFailure {
                task_id,
                attempts,
                last_error,
            } => OrchestratorError::StartupFailure {
                task_id,
                attempts,
                last_error,
            },
            other => OrchestratorError::Supervisor(other),
        }
    }
}

/// 调度管理错误类型
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid schedule: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Schedule {0} not found")]
    NotFound(ScheduleId),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// 单次调度触发失败
///
/// 不影响调度本身，调度保持启用并在下一次自然时间重新评估
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Schedule {schedule_id} failed to fire task {task_id}: {reason}")]
pub struct ScheduleFireError {
    pub schedule_id: ScheduleId,
    pub task_id: TaskId,
    pub reason: String,
}

/// 页面抓取错误类型
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream responded with status {0}")]
    Status(u16),

    #[error("Invalid result selector '{0}'")]
    Selector(String),

    #[error("Invalid URL template: {0}")]
    Template(String),

    #[error("Invalid proxy '{0}'")]
    Proxy(String),
}

impl ExtractionError {
    /// 是否为可通过重试恢复的暂时性错误
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExtractionError::Http(error) => {
                error.is_timeout() || error.is_connect() || is_transient_error(&error.to_string())
            }
            ExtractionError::Status(status) => *status == 429 || *status >= 500,
            ExtractionError::Selector(_)
            | ExtractionError::Template(_)
            | ExtractionError::Proxy(_) => false,
        }
    }
}
