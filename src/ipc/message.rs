// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::models::task::{TaskConfig, TaskId, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// 控制器与工作进程之间交换的消息
///
/// 每条消息都携带任务ID，以便在多个工作进程共享通道时无歧义地路由
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Message {
    /// 控制器 → 工作进程：开始或恢复执行
    Start {
        task_id: TaskId,
        assignment: Box<WorkerAssignment>,
    },
    /// 控制器 → 工作进程：请求优雅退出
    Stop { task_id: TaskId },
    /// 控制器 → 工作进程：暂停，进程保持存活
    Pause { task_id: TaskId },
    /// 工作进程 → 控制器：进度快照
    Progress {
        task_id: TaskId,
        progress: ProgressSnapshot,
    },
    /// 工作进程 → 控制器：运行结束并附带结果
    Completed {
        task_id: TaskId,
        results: Vec<Value>,
    },
    /// 工作进程 → 控制器：运行出错
    Error {
        task_id: TaskId,
        error: String,
        recoverable: bool,
    },
}

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Start,
    Stop,
    Pause,
    Progress,
    Completed,
    Error,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MessageKind::Start => "START",
            MessageKind::Stop => "STOP",
            MessageKind::Pause => "PAUSE",
            MessageKind::Progress => "PROGRESS",
            MessageKind::Completed => "COMPLETED",
            MessageKind::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// 工作进程执行一次运行所需的全部信息，随 START 下发
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAssignment {
    pub task_id: TaskId,
    pub run_id: Uuid,
    pub task_type: TaskType,
    pub config: TaskConfig,
    pub target: PlatformTarget,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub account_label: Option<String>,
    /// 为真时表示从暂停中恢复
    #[serde(default)]
    pub resume: bool,
}

/// 平台解析规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformTarget {
    pub url_template: String,
    pub result_selector: String,
}

/// 线上格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
}

/// 帧内容与消息类型不匹配
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("{0} frame is missing `{1}`")]
    MissingField(MessageKind, &'static str),

    #[error("Invalid {0} payload: {1}")]
    Payload(MessageKind, serde_json::Error),
}

impl Message {
    /// 消息所属任务
    pub fn task_id(&self) -> TaskId {
        match self {
            Message::Start { task_id, .. }
            | Message::Stop { task_id }
            | Message::Pause { task_id }
            | Message::Progress { task_id, .. }
            | Message::Completed { task_id, .. }
            | Message::Error { task_id, .. } => *task_id,
        }
    }

    /// 消息类型
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Start { .. } => MessageKind::Start,
            Message::Stop { .. } => MessageKind::Stop,
            Message::Pause { .. } => MessageKind::Pause,
            Message::Progress { .. } => MessageKind::Progress,
            Message::Completed { .. } => MessageKind::Completed,
            Message::Error { .. } => MessageKind::Error,
        }
    }

    /// COMPLETED 与 ERROR 为终止消息
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Completed { .. } | Message::Error { .. })
    }

    /// 构造 START
    pub fn start(assignment: WorkerAssignment) -> Self {
        Message::Start {
            task_id: assignment.task_id,
            assignment: Box::new(assignment),
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let mut envelope = Envelope {
            kind: message.kind(),
            task_id: message.task_id(),
            data: None,
            error: None,
            recoverable: None,
            progress: None,
        };

        match message {
            Message::Start { assignment, .. } => {
                envelope.data = serde_json::to_value(*assignment).ok();
            }
            Message::Stop { .. } | Message::Pause { .. } => {}
            Message::Progress { progress, .. } => envelope.progress = Some(progress),
            Message::Completed { results, .. } => {
                envelope.data = Some(json!({
                    "resultsCount": results.len(),
                    "results": results,
                }));
            }
            Message::Error {
                error, recoverable, ..
            } => {
                envelope.error = Some(error);
                envelope.recoverable = Some(recoverable);
            }
        }

        envelope
    }
}

impl TryFrom<Envelope> for Message {
    type Error = FrameError;

    fn try_from(envelope: Envelope) -> Result<Self, FrameError> {
        let Envelope {
            kind,
            task_id,
            data,
            error,
            recoverable,
            progress,
        } = envelope;

        let message = match kind {
            MessageKind::Start => {
                let data = data.ok_or(FrameError::MissingField(kind, "data"))?;
                let assignment: WorkerAssignment =
                    serde_json::from_value(data).map_err(|e| FrameError::Payload(kind, e))?;
                Message::Start {
                    task_id,
                    assignment: Box::new(assignment),
                }
            }
            MessageKind::Stop => Message::Stop { task_id },
            MessageKind::Pause => Message::Pause { task_id },
            MessageKind::Progress => Message::Progress {
                task_id,
                progress: progress.ok_or(FrameError::MissingField(kind, "progress"))?,
            },
            MessageKind::Completed => {
                let results = match data.and_then(|mut data| data.get_mut("results").map(Value::take)) {
                    Some(Value::Array(results)) => results,
                    Some(_) | None => Vec::new(),
                };
                Message::Completed { task_id, results }
            }
            MessageKind::Error => Message::Error {
                task_id,
                error: error.ok_or(FrameError::MissingField(kind, "error"))?,
                recoverable: recoverable.unwrap_or(false),
            },
        };

        Ok(message)
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
