// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::schedule_request::ScheduleRequest;
use crate::domain::models::schedule::{NewSchedule, Schedule, ScheduleId, TriggerType};
use crate::domain::repositories::schedule_repository::ScheduleRepository;
use crate::domain::repositories::task_repository::TaskRepository;
use crate::scheduler::trigger::{next_occurrence, CronExpression};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::errors::ScheduleError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

/// 调度管理服务
///
/// 负责调度定义的校验与增删改查，并计算首次运行时间
pub struct ScheduleService {
    schedules: Arc<dyn ScheduleRepository>,
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
}

impl ScheduleService {
    pub fn new(schedules: Arc<dyn ScheduleRepository>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self {
            schedules,
            tasks,
            clock: Arc::new(SystemClock),
        }
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 创建调度
    ///
    /// # 参数
    ///
    /// * `request` - 调度定义
    ///
    /// # 返回值
    ///
    /// * `Ok(Schedule)` - 已保存的调度，带有首次运行时间
    /// * `Err(ScheduleError)` - cron表达式非法、定义不完整或引用的任务不存在
    #[instrument(skip(self, request), fields(name = %request.name, task_id = request.task_id))]
    pub async fn create_schedule(&self, request: ScheduleRequest) -> Result<Schedule, ScheduleError> {
        self.validate(&request).await?;
        let next_run_at = self.first_run(&request, self.clock.now())?;

        let schedule = self
            .schedules
            .create(&NewSchedule {
                name: request.name.trim().to_string(),
                description: request.description,
                task_type: request.task_type,
                task_id: request.task_id,
                trigger_type: request.trigger_type,
                cron_expression: request.cron_expression.map(|e| e.trim().to_string()),
                run_at: request.run_at,
                is_active: request.is_active,
                dependency_condition: request.dependency_condition,
                depends_on_task_id: request.depends_on_task_id,
                delay_minutes: request.delay_minutes,
                next_run_at,
            })
            .await?;

        info!(schedule_id = schedule.id, next_run_at = ?schedule.next_run_at, "Schedule created");
        Ok(schedule)
    }

    /// 整体替换调度定义，保留触发历史
    #[instrument(skip(self, request))]
    pub async fn update_schedule(
        &self,
        id: ScheduleId,
        request: ScheduleRequest,
    ) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.load(id).await?;
        self.validate(&request).await?;
        let now = self.clock.now();

        schedule.name = request.name.trim().to_string();
        schedule.description = request.description.clone();
        schedule.task_type = request.task_type;
        schedule.task_id = request.task_id;
        schedule.trigger_type = request.trigger_type;
        schedule.cron_expression = request.cron_expression.as_ref().map(|e| e.trim().to_string());
        schedule.run_at = request.run_at;
        schedule.is_active = request.is_active;
        schedule.dependency_condition = request.dependency_condition;
        schedule.depends_on_task_id = request.depends_on_task_id;
        schedule.delay_minutes = request.delay_minutes;
        schedule.next_run_at = self.first_run(&request, now)?;
        schedule.last_error = None;
        schedule.updated_at = now;

        let schedule = self.schedules.update(&schedule).await?;
        info!(schedule_id = id, next_run_at = ?schedule.next_run_at, "Schedule updated");
        Ok(schedule)
    }

    /// 启用或停用调度
    ///
    /// 启用时从当前时间重新计算下次运行时间，停用时清空
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: ScheduleId, active: bool) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.load(id).await?;
        let now = self.clock.now();

        schedule.is_active = active;
        schedule.next_run_at = if active {
            next_occurrence(&schedule, now)?
        } else {
            None
        };
        schedule.updated_at = now;

        let schedule = self.schedules.update(&schedule).await?;
        info!(schedule_id = id, active, "Schedule toggled");
        Ok(schedule)
    }

    /// 删除调度
    #[instrument(skip(self))]
    pub async fn delete_schedule(&self, id: ScheduleId) -> Result<(), ScheduleError> {
        if !self.schedules.delete(id).await? {
            return Err(ScheduleError::NotFound(id));
        }
        info!(schedule_id = id, "Schedule deleted");
        Ok(())
    }

    pub async fn get_schedule(&self, id: ScheduleId) -> Result<Schedule, ScheduleError> {
        self.load(id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>, ScheduleError> {
        Ok(self.schedules.list().await?)
    }

    async fn load(&self, id: ScheduleId) -> Result<Schedule, ScheduleError> {
        self.schedules
            .find_by_id(id)
            .await?
            .ok_or(ScheduleError::NotFound(id))
    }

    async fn validate(&self, request: &ScheduleRequest) -> Result<(), ScheduleError> {
        if let Some(expression) = &request.cron_expression {
            if request.trigger_type == TriggerType::Cron {
                expression.parse::<CronExpression>()?;
            }
        }

        let mut violations = request.violations();

        match self.tasks.find_by_id(request.task_id).await? {
            None => violations.push(format!("task {} does not exist", request.task_id)),
            Some(task) if task.task_type != request.task_type => violations.push(format!(
                "task {} is {}, not {}",
                task.id, task.task_type, request.task_type
            )),
            Some(_) => {}
        }

        if let Some(prerequisite) = request.depends_on_task_id {
            if self.tasks.find_by_id(prerequisite).await?.is_none() {
                violations.push(format!("prerequisite task {prerequisite} does not exist"));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::Validation(violations))
        }
    }

    fn first_run(
        &self,
        request: &ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        if !request.is_active {
            return Ok(None);
        }

        match (request.trigger_type, &request.cron_expression) {
            (TriggerType::Cron, Some(expression)) => {
                Ok(expression.parse::<CronExpression>()?.next_after(now))
            }
            (TriggerType::Cron, None) => Err(ScheduleError::Validation(vec![
                "cron_expression required for CRON".to_string(),
            ])),
            (TriggerType::OneTime, _) => Ok(Some(request.run_at.unwrap_or(now))),
        }
    }
}
