// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use crate::ipc::codec::{FrameReader, FrameWriter};
use crate::ipc::message::Message;
use crate::utils::errors::{IpcError, SupervisorError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const OUTPUT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 工作进程的输出
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutput {
    /// 标准输出上的一帧消息
    Frame(Message),
    /// 标准错误上的一行文本
    Stderr(String),
    /// 进程已退出，信号终止时退出码为空
    Exited(Option<i32>),
}

/// 已启动的工作进程
///
/// 标准输出上的帧总是先于 `Exited` 送达。丢弃 `kill` 发送端会终止进程。
pub struct WorkerProcess {
    pub pid: Option<u32>,
    pub commands: mpsc::Sender<Message>,
    pub output: mpsc::Receiver<WorkerOutput>,
    pub kill: oneshot::Sender<()>,
}

/// 工作进程启动器
///
/// 监督器只通过该接口创建进程
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, task_id: TaskId) -> Result<WorkerProcess, SupervisorError>;
}

/// 基于操作系统进程的启动器
///
/// 通过标准输入下发消息，从标准输出读取消息，标准错误按行转发
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    /// 创建启动器
    ///
    /// # 参数
    ///
    /// * `program` - 工作进程可执行文件
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// 追加命令行参数
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 追加环境变量
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, task_id: TaskId) -> Result<WorkerProcess, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("SCRAPEFLOW_TASK_ID", task_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SupervisorError::Spawn(format!("{}: {}", self.program.display(), e))
            })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Spawn("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Spawn("worker stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SupervisorError::Spawn("worker stderr unavailable".to_string()))?;

        let (command_tx, mut command_rx) = mpsc::channel::<Message>(COMMAND_BUFFER);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(message) = command_rx.recv().await {
                if let Err(e) = writer.send(&message).await {
                    debug!(task_id, error = %e, "Worker stdin closed");
                    break;
                }
            }
        });

        let frames_tx = output_tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.next_frame().await {
                    Ok(Some(message)) => {
                        if frames_tx.send(WorkerOutput::Frame(message)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(IpcError::Decode(e)) => {
                        warn!(task_id, error = %e, "Dropping malformed frame from worker");
                    }
                    Err(e) => {
                        debug!(task_id, error = %e, "Worker stdout closed");
                        break;
                    }
                }
            }
        });

        let stderr_tx = output_tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(WorkerOutput::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!(task_id, error = %e, "Kill signal not delivered");
                    }
                    child.wait().await
                }
            };

            // Flush pipes so every frame precedes the exit notification.
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, stdout_task).await;
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, stderr_task).await;

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(task_id, error = %e, "Failed to collect worker exit status");
                    None
                }
            };
            let _ = output_tx.send(WorkerOutput::Exited(code)).await;
        });

        Ok(WorkerProcess {
            pid,
            commands: command_tx,
            output: output_rx,
            kill: kill_tx,
        })
    }
}
