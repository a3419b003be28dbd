// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 进度快照
///
/// 每条 PROGRESS 消息都会整体覆盖任务上的快照，百分比与剩余时间均为派生值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// 当前已完成的页数
    pub current_page: u32,
    /// 总页数，未知时为空
    #[serde(default)]
    pub total_pages: Option<u32>,
    /// 已收集的结果数
    pub results_count: u64,
    /// 完成百分比
    #[serde(default)]
    pub percentage: Option<f64>,
    /// 预计剩余秒数
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
}

impl ProgressSnapshot {
    /// 根据页数与结果数创建快照并计算百分比
    pub fn new(current_page: u32, total_pages: Option<u32>, results_count: u64) -> Self {
        let percentage = total_pages.filter(|total| *total > 0).map(|total| {
            let ratio = f64::from(current_page.min(total)) / f64::from(total);
            (ratio * 10_000.0).round() / 100.0
        });

        Self {
            current_page,
            total_pages,
            results_count,
            percentage,
            estimated_time_remaining: None,
        }
    }

    /// 启动确认时发送的初始快照
    pub fn starting(total_pages: Option<u32>) -> Self {
        Self::new(0, total_pages, 0)
    }

    /// 根据已用时间推算剩余时间
    ///
    /// 使用平均每页耗时乘以剩余页数
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.estimated_time_remaining = match self.total_pages {
            Some(total) if self.current_page > 0 && total >= self.current_page => {
                let per_page = elapsed.as_secs_f64() / f64::from(self.current_page);
                let remaining = f64::from(total - self.current_page) * per_page;
                Some(remaining.round() as u64)
            }
            _ => None,
        };
        self
    }

    /// 是否已达到总页数
    pub fn is_finished(&self) -> bool {
        matches!(self.total_pages, Some(total) if self.current_page >= total)
    }
}
