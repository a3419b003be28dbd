// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::schedule::{Schedule, ScheduleId};
use crate::domain::models::task::{Task, TaskId};
use crate::domain::repositories::schedule_repository::ScheduleRepository;
use crate::scheduler::trigger::next_occurrence;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::errors::{OrchestratorError, ScheduleError, ScheduleFireError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 调度器配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// 两次评估之间的间隔
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
        }
    }
}

/// 调度器触发的目标
///
/// 由任务编排器实现，调度器只通过它读取任务和发起启动
#[async_trait]
pub trait ScheduleTarget: Send + Sync {
    /// 读取任务当前记录
    async fn lookup_task(&self, task_id: TaskId) -> Result<Option<Task>, OrchestratorError>;

    /// 启动任务
    async fn fire(&self, task_id: TaskId) -> Result<(), OrchestratorError>;
}

/// 单轮评估的结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// 成功触发的调度
    pub fired: Vec<ScheduleId>,
    /// 因依赖条件不满足或目标任务忙而跳过的调度
    pub skipped: Vec<ScheduleId>,
    /// 触发失败的调度
    pub failed: Vec<ScheduleFireError>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

enum Verdict {
    /// 还没到时间，保持不变
    NotDue,
    Fired,
    Skipped(&'static str),
    Failed(String),
}

/// 调度器
///
/// 周期性评估所有启用的调度，到期且依赖条件满足时启动绑定的任务
pub struct Scheduler {
    schedules: Arc<dyn ScheduleRepository>,
    target: Arc<dyn ScheduleTarget>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// 创建调度器
    ///
    /// # 参数
    ///
    /// * `schedules` - 调度仓库
    /// * `target` - 触发目标
    /// * `config` - 调度器配置
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        target: Arc<dyn ScheduleTarget>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            target,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 启动后台评估循环
    ///
    /// # 参数
    ///
    /// * `shutdown` - 值变为 `true` 或发送端关闭时退出循环
    ///
    /// # 返回值
    ///
    /// 返回后台任务的句柄
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = self.config.tick_interval.as_secs(),
                "Scheduler started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(report) if !report.is_empty() => {
                                info!(
                                    fired = report.fired.len(),
                                    skipped = report.skipped.len(),
                                    failed = report.failed.len(),
                                    "Scheduler tick"
                                );
                            }
                            Ok(_) => debug!("Scheduler tick, nothing due"),
                            Err(e) => error!("Scheduler tick failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Scheduler stopped");
        })
    }

    /// 评估一轮所有启用的调度
    ///
    /// # 返回值
    ///
    /// * `Ok(TickReport)` - 本轮触发、跳过与失败的调度
    /// * `Err(ScheduleError)` - 无法读取调度列表
    pub async fn tick(&self) -> Result<TickReport, ScheduleError> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        for mut schedule in self.schedules.find_active().await? {
            let schedule_id = schedule.id;
            let task_id = schedule.task_id;

            match self.evaluate(&mut schedule, now).await {
                Verdict::NotDue => continue,
                Verdict::Fired => {
                    info!(schedule_id, task_id, next_run_at = ?schedule.next_run_at, "Schedule fired");
                    counter!("schedule_fired_total").increment(1);
                    report.fired.push(schedule_id);
                }
                Verdict::Skipped(reason) => {
                    info!(schedule_id, task_id, reason, "Schedule skipped");
                    counter!("schedule_skipped_total", "reason" => reason).increment(1);
                    report.skipped.push(schedule_id);
                }
                Verdict::Failed(reason) => {
                    let failure = ScheduleFireError {
                        schedule_id,
                        task_id,
                        reason,
                    };
                    warn!("{}", failure);
                    counter!("schedule_fire_failures_total").increment(1);
                    report.failed.push(failure);
                }
            }

            if let Err(e) = self.schedules.update(&schedule).await {
                error!(schedule_id, "Failed to persist schedule state: {}", e);
            }
        }

        Ok(report)
    }

    async fn evaluate(&self, schedule: &mut Schedule, now: DateTime<Utc>) -> Verdict {
        match schedule.next_run_at {
            Some(next_run) if next_run <= now => {}
            _ => return Verdict::NotDue,
        }

        let condition = schedule.dependency_condition;
        let prerequisite = match (condition.requires_prerequisite(), schedule.depends_on_task_id) {
            (false, _) => None,
            (true, None) => {
                let reason = format!("{condition} schedule has no prerequisite task");
                schedule.record_miss(now, self.following(schedule, now), Some(reason.clone()));
                return Verdict::Failed(reason);
            }
            (true, Some(prerequisite_id)) => match self.target.lookup_task(prerequisite_id).await {
                Ok(Some(task)) => Some(task),
                Ok(None) => {
                    let reason = format!("prerequisite task {prerequisite_id} does not exist");
                    schedule.record_miss(now, self.following(schedule, now), Some(reason.clone()));
                    return Verdict::Failed(reason);
                }
                // Leave the schedule untouched so the next tick retries.
                Err(e) => return Verdict::Failed(e.to_string()),
            },
        };

        if let Some(task) = &prerequisite {
            if !condition.is_satisfied_by(task.last_outcome) {
                schedule.record_miss(now, self.following(schedule, now), None);
                return Verdict::Skipped("dependency_unmet");
            }
        }

        match schedule.due_at(prerequisite.as_ref()) {
            Some(due) if due <= now => {}
            _ => return Verdict::NotDue,
        }

        match self.target.lookup_task(schedule.task_id).await {
            Ok(Some(task)) if task.status.is_active() => {
                schedule.record_miss(now, self.following(schedule, now), None);
                return Verdict::Skipped("target_busy");
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                let reason = format!("task {} does not exist", schedule.task_id);
                schedule.record_miss(now, self.following(schedule, now), Some(reason.clone()));
                return Verdict::Failed(reason);
            }
            Err(e) => return Verdict::Failed(e.to_string()),
        }

        match self.target.fire(schedule.task_id).await {
            Ok(()) => {
                schedule.record_fire(now, self.following(schedule, now));
                Verdict::Fired
            }
            Err(e) => {
                let reason = e.to_string();
                schedule.record_miss(now, self.following(schedule, now), Some(reason.clone()));
                Verdict::Failed(reason)
            }
        }
    }

    /// 下一次自然触发时间，表达式已损坏时返回 `None` 使调度不再到期
    fn following(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match next_occurrence(schedule, now) {
            Ok(next) => next,
            Err(e) => {
                error!(schedule_id = schedule.id, "Cannot compute next run: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
