// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::models::task::TaskId;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 停止的结果
///
/// 调用方总能知道终止是优雅的还是强制的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// 进程响应 STOP 自行退出，或者重启尚未发生即被取消
    Graceful,
    /// 宽限期内未退出，已强制终止
    Forced,
    /// 没有存活的工作进程
    NotRunning,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StopOutcome::Graceful => write!(f, "graceful"),
            StopOutcome::Forced => write!(f, "forced"),
            StopOutcome::NotRunning => write!(f, "not running"),
        }
    }
}

/// 监督器生命周期事件
///
/// 每次状态转换都会发出一条，编排器据此更新任务记录
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Started {
        task_id: TaskId,
        run_id: Uuid,
        pid: Option<u32>,
    },
    StartFailed {
        task_id: TaskId,
        run_id: Uuid,
        attempt: u32,
        error: String,
    },
    Progress {
        task_id: TaskId,
        run_id: Uuid,
        progress: ProgressSnapshot,
    },
    Completed {
        task_id: TaskId,
        run_id: Uuid,
        results: Vec<Value>,
    },
    /// 工作进程报告了不可恢复的错误
    Failed {
        task_id: TaskId,
        run_id: Uuid,
        error: String,
    },
    Crashed {
        task_id: TaskId,
        run_id: Uuid,
        exit_code: Option<i32>,
        reason: String,
    },
    RestartScheduled {
        task_id: TaskId,
        run_id: Uuid,
        attempt: u32,
        delay: Duration,
    },
    Restarted {
        task_id: TaskId,
        run_id: Uuid,
        attempt: u32,
        pid: Option<u32>,
    },
    RestartFailed {
        task_id: TaskId,
        run_id: Uuid,
        attempt: u32,
        error: String,
    },
    /// 重启次数耗尽，不再自动处理
    GaveUp {
        task_id: TaskId,
        run_id: Uuid,
        attempts: u32,
        last_error: String,
    },
    Paused {
        task_id: TaskId,
        run_id: Uuid,
    },
    Resumed {
        task_id: TaskId,
        run_id: Uuid,
    },
    Stopped {
        task_id: TaskId,
        run_id: Uuid,
        outcome: StopOutcome,
    },
}

impl SupervisorEvent {
    /// 事件所属任务
    pub fn task_id(&self) -> TaskId {
        match self {
            SupervisorEvent::Started { task_id, .. }
            | SupervisorEvent::StartFailed { task_id, .. }
            | SupervisorEvent::Progress { task_id, .. }
            | SupervisorEvent::Completed { task_id, .. }
            | SupervisorEvent::Failed { task_id, .. }
            | SupervisorEvent::Crashed { task_id, .. }
            | SupervisorEvent::RestartScheduled { task_id, .. }
            | SupervisorEvent::Restarted { task_id, .. }
            | SupervisorEvent::RestartFailed { task_id, .. }
            | SupervisorEvent::GaveUp { task_id, .. }
            | SupervisorEvent::Paused { task_id, .. }
            | SupervisorEvent::Resumed { task_id, .. }
            | SupervisorEvent::Stopped { task_id, .. } => *task_id,
        }
    }

    /// 事件名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Started { .. } => "started",
            SupervisorEvent::StartFailed { .. } => "start_failed",
            SupervisorEvent::Progress { .. } => "progress",
            SupervisorEvent::Completed { .. } => "completed",
            SupervisorEvent::Failed { .. } => "failed",
            SupervisorEvent::Crashed { .. } => "crashed",
            SupervisorEvent::RestartScheduled { .. } => "restart_scheduled",
            SupervisorEvent::Restarted { .. } => "restarted",
            SupervisorEvent::RestartFailed { .. } => "restart_failed",
            SupervisorEvent::GaveUp { .. } => "gave_up",
            SupervisorEvent::Paused { .. } => "paused",
            SupervisorEvent::Resumed { .. } => "resumed",
            SupervisorEvent::Stopped { .. } => "stopped",
        }
    }
}

/// 事件发送端
pub type EventSender = mpsc::UnboundedSender<SupervisorEvent>;

/// 事件接收端
pub type EventReceiver = mpsc::UnboundedReceiver<SupervisorEvent>;
