// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use crate::ipc::message::{Message, WorkerAssignment};
use crate::workers::events::StopOutcome;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

/// 句柄状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// 进程存活并在执行
    Running,
    /// 已发送 PAUSE，进程存活并阻塞等待恢复
    Paused,
    /// 已发送 STOP，等待进程退出
    Stopping,
    /// 已崩溃，等待重启定时器
    Restarting,
}

/// 进程已上报的终止消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    Completed,
    Failed,
}

/// 监督器内部的工作进程句柄，不落库
pub(crate) struct WorkerHandle {
    pub task_id: TaskId,
    pub run_id: Uuid,
    pub pid: Option<u32>,
    pub state: HandleState,
    /// 连续重启次数
    pub restart_attempts: u32,
    pub last_seen_alive: Instant,
    pub launched_at: Instant,
    /// 每次拉起进程递增，用于识别过期的监控任务
    pub generation: u64,
    pub assignment: WorkerAssignment,
    pub commands: mpsc::Sender<Message>,
    pub kill: Option<oneshot::Sender<()>>,
    pub terminal: Option<Terminal>,
    pub last_stderr: Option<String>,
    pub last_error: Option<String>,
    pub pending_restart: Option<oneshot::Sender<()>>,
    pub exit_notify: Option<oneshot::Sender<Option<i32>>>,
    pub stop_outcome: Option<watch::Receiver<Option<StopOutcome>>>,
}

impl WorkerHandle {
    pub fn new(
        assignment: WorkerAssignment,
        generation: u64,
        pid: Option<u32>,
        commands: mpsc::Sender<Message>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        let now = Instant::now();
        Self {
            task_id: assignment.task_id,
            run_id: assignment.run_id,
            pid,
            state: HandleState::Running,
            restart_attempts: 0,
            last_seen_alive: now,
            launched_at: now,
            generation,
            assignment,
            commands,
            kill: Some(kill),
            terminal: None,
            last_stderr: None,
            last_error: None,
            pending_restart: None,
            exit_notify: None,
            stop_outcome: None,
        }
    }

    /// 重启后绑定新进程，保留运行标识与重启计数
    pub fn attach(
        &mut self,
        generation: u64,
        pid: Option<u32>,
        commands: mpsc::Sender<Message>,
        kill: oneshot::Sender<()>,
    ) {
        let now = Instant::now();
        self.generation = generation;
        self.pid = pid;
        self.commands = commands;
        self.kill = Some(kill);
        self.state = HandleState::Running;
        self.terminal = None;
        self.last_stderr = None;
        self.launched_at = now;
        self.last_seen_alive = now;
    }

    /// 发送强制终止信号，返回信号是否仍可发送
    pub fn force_kill(&mut self) -> bool {
        match self.kill.take() {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            task_id: self.task_id,
            run_id: self.run_id,
            pid: self.pid,
            state: self.state,
            restart_attempts: self.restart_attempts,
            last_seen_alive: self.last_seen_alive,
        }
    }
}

/// 句柄的只读视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub task_id: TaskId,
    pub run_id: Uuid,
    pub pid: Option<u32>,
    pub state: HandleState,
    pub restart_attempts: u32,
    pub last_seen_alive: Instant,
}
