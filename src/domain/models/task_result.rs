// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务结果记录
///
/// 由 COMPLETED 消息携带的结果逐条落库，按运行区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: i64,
    pub task_id: TaskId,
    pub run_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total: u64,
}

impl<T> Page<T> {
    /// 空页
    pub fn empty(page: u64, size: u64) -> Self {
        Self {
            items: Vec::new(),
            page,
            size,
            total: 0,
        }
    }
}
