// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::application::dto::task_request::CreateTaskRequest;
use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::models::task::{Task, TaskId, TaskStatus, TaskType};
use crate::domain::models::task_result::{Page, TaskResult};
use crate::domain::repositories::reference_repository::ReferenceRepository;
use crate::domain::repositories::task_repository::{RepositoryError, TaskRepository};
use crate::domain::repositories::task_result_repository::TaskResultRepository;
use crate::ipc::message::{PlatformTarget, WorkerAssignment};
use crate::scheduler::runner::ScheduleTarget;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::errors::OrchestratorError;
use crate::workers::events::{EventReceiver, StopOutcome, SupervisorEvent};
use crate::workers::supervisor::ProcessSupervisor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// 结果分页的最大页大小
pub const MAX_RESULT_PAGE_SIZE: u64 = 500;

/// 任务状态报告
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: Option<ProgressSnapshot>,
    pub worker_pid: Option<u32>,
    /// 监督器当前是否持有该任务的工作进程
    pub worker_alive: bool,
    pub run_id: Option<Uuid>,
    pub last_outcome: Option<TaskStatus>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 任务编排器
///
/// 外部调用方唯一的入口。负责校验、持久化任务状态，并把进程操作委托给监督器。
/// 同一任务的操作与事件应用按任务串行化。
pub struct TaskOrchestrator {
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn TaskResultRepository>,
    references: Arc<dyn ReferenceRepository>,
    supervisor: ProcessSupervisor,
    clock: Arc<dyn Clock>,
    locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl TaskOrchestrator {
    /// 创建任务编排器
    ///
    /// # 参数
    ///
    /// * `tasks` - 任务仓库
    /// * `results` - 结果仓库
    /// * `references` - 平台、账号与代理仓库
    /// * `supervisor` - 进程监督器
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        results: Arc<dyn TaskResultRepository>,
        references: Arc<dyn ReferenceRepository>,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            tasks,
            results,
            references,
            supervisor,
            clock: Arc::new(SystemClock),
            locks: DashMap::new(),
        }
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn lock_for(&self, task_id: TaskId) -> Arc<Mutex<()>> {
        self.locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn load(&self, task_id: TaskId) -> Result<Task, OrchestratorError> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or(OrchestratorError::NotFound(task_id))
    }

    /// 创建任务
    ///
    /// # 参数
    ///
    /// * `request` - 任务配置
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 新建的待处理任务
    /// * `Err(OrchestratorError::Validation)` - 携带全部违反的约束
    #[instrument(skip(self, request), fields(name = %request.name, task_type = %request.task_type))]
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<Task, OrchestratorError> {
        let mut violations = request.violations();
        violations.extend(
            self.reference_violations(
                request.task_type,
                &request.platform,
                request.account_id,
                request.proxy_id,
            )
            .await?,
        );

        if !violations.is_empty() {
            warn!(?violations, "Rejected task configuration");
            counter!("tasks_rejected_total").increment(1);
            return Err(OrchestratorError::Validation(violations));
        }

        let task = self.tasks.create(&request.into_new_task()).await?;
        info!(task_id = task.id, "Task created");
        counter!("tasks_created_total").increment(1);
        Ok(task)
    }

    async fn reference_violations(
        &self,
        task_type: TaskType,
        platform_key: &str,
        account_id: Option<i64>,
        proxy_id: Option<i64>,
    ) -> Result<Vec<String>, RepositoryError> {
        let mut violations = Vec::new();

        if !platform_key.is_empty() {
            match self.references.find_platform(platform_key).await? {
                None => violations.push(format!("platform '{platform_key}' does not exist")),
                Some(platform) if !platform.is_active => {
                    violations.push(format!("platform '{platform_key}' is inactive"))
                }
                Some(platform) if !platform.supports(task_type) => violations.push(format!(
                    "platform '{platform_key}' does not support {task_type}"
                )),
                Some(_) => {}
            }
        }

        if let Some(account_id) = account_id {
            match self.references.find_account(account_id).await? {
                None => violations.push(format!("account {account_id} does not exist")),
                Some(account) if !account.is_active => {
                    violations.push(format!("account {account_id} is inactive"))
                }
                Some(_) => {}
            }
        }

        if let Some(proxy_id) = proxy_id {
            match self.references.find_proxy(proxy_id).await? {
                None => violations.push(format!("proxy {proxy_id} does not exist")),
                Some(proxy) if !proxy.is_active => {
                    violations.push(format!("proxy {proxy_id} is inactive"))
                }
                Some(_) => {}
            }
        }

        Ok(violations)
    }

    /// 解析本次运行的工作进程分配
    async fn assignment_for(&self, task: &Task) -> Result<WorkerAssignment, OrchestratorError> {
        let violations = self
            .reference_violations(
                task.task_type,
                &task.config.platform,
                task.config.account_id,
                task.config.proxy_id,
            )
            .await?;
        if !violations.is_empty() {
            return Err(OrchestratorError::Validation(violations));
        }

        let platform = self
            .references
            .find_platform(&task.config.platform)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let proxy_url = match task.config.proxy_id {
            Some(id) => self.references.find_proxy(id).await?.map(|proxy| proxy.url),
            None => None,
        };
        let account_label = match task.config.account_id {
            Some(id) => self
                .references
                .find_account(id)
                .await?
                .map(|account| account.label),
            None => None,
        };

        Ok(WorkerAssignment {
            task_id: task.id,
            run_id: Uuid::new_v4(),
            task_type: task.task_type,
            config: task.config.clone(),
            target: PlatformTarget {
                url_template: platform.url_template,
                result_selector: platform.result_selector,
            },
            proxy_url,
            account_label,
            resume: false,
        })
    }

    /// 启动任务
    ///
    /// 监督器确认工作进程存活后才持久化为运行中；启动失败时状态不变，
    /// 错误记录到 `last_error` 并返回给调用方
    ///
    /// # 参数
    ///
    /// * `task_id` - 任务ID
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 已进入运行中的任务
    /// * `Err(OrchestratorError)` - 任务不存在、状态不允许或启动失败
    #[instrument(skip(self))]
    pub async fn start_task(&self, task_id: TaskId) -> Result<Task, OrchestratorError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        match task.status {
            TaskStatus::InProgress => return Err(OrchestratorError::AlreadyRunning(task_id)),
            TaskStatus::Paused => {
                return Err(OrchestratorError::InvalidState {
                    task_id,
                    status: task.status,
                    action: "start",
                })
            }
            TaskStatus::Pending | TaskStatus::Completed | TaskStatus::Failed => {}
        }

        let assignment = self.assignment_for(&task).await?;
        let run_id = assignment.run_id;

        match self.supervisor.start(assignment).await {
            Ok(started) => {
                task.start(run_id, started.pid, self.clock.now())?;
                match self.tasks.update(&task).await {
                    Ok(task) => {
                        info!(task_id, %run_id, pid = ?started.pid, "Task started");
                        Ok(task)
                    }
                    Err(e) => {
                        error!(task_id, "Failed to persist started task, stopping worker: {}", e);
                        self.supervisor.stop(task_id).await;
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                warn!(task_id, %run_id, "Task failed to start: {}", e);
                task.last_error = Some(e.to_string());
                task.updated_at = self.clock.now();
                self.tasks.update(&task).await?;
                Err(e.into())
            }
        }
    }

    /// 停止任务
    ///
    /// 对没有工作进程的任务是空操作，返回 `StopOutcome::NotRunning`
    #[instrument(skip(self))]
    pub async fn stop_task(&self, task_id: TaskId) -> Result<StopOutcome, OrchestratorError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        let outcome = self.supervisor.stop(task_id).await;

        if task.status.is_active() {
            task.reset_after_stop(format!("stopped ({outcome})"), self.clock.now());
            self.tasks.update(&task).await?;
            info!(task_id, %outcome, "Task stopped");
        } else {
            debug!(task_id, %outcome, status = %task.status, "Stop on idle task");
        }

        Ok(outcome)
    }

    /// 暂停任务，工作进程保持存活
    #[instrument(skip(self))]
    pub async fn pause_task(&self, task_id: TaskId) -> Result<Task, OrchestratorError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        match task.status {
            TaskStatus::Paused => return Ok(task),
            TaskStatus::InProgress => {}
            status => {
                return Err(OrchestratorError::InvalidState {
                    task_id,
                    status,
                    action: "pause",
                })
            }
        }

        self.supervisor.pause(task_id).await?;
        task.pause(self.clock.now())?;
        let task = self.tasks.update(&task).await?;
        info!(task_id, "Task paused");
        Ok(task)
    }

    /// 恢复已暂停的任务
    #[instrument(skip(self))]
    pub async fn resume_task(&self, task_id: TaskId) -> Result<Task, OrchestratorError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let mut task = self.load(task_id).await?;
        match task.status {
            TaskStatus::InProgress => return Ok(task),
            TaskStatus::Paused => {}
            status => {
                return Err(OrchestratorError::InvalidState {
                    task_id,
                    status,
                    action: "resume",
                })
            }
        }

        self.supervisor.resume(task_id).await?;
        task.resume(self.clock.now())?;
        let task = self.tasks.update(&task).await?;
        info!(task_id, "Task resumed");
        Ok(task)
    }

    /// 查询任务状态
    pub async fn get_task_status(&self, task_id: TaskId) -> Result<TaskStatusReport, OrchestratorError> {
        let task = self.load(task_id).await?;

        Ok(TaskStatusReport {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            worker_pid: task.worker_pid,
            worker_alive: self.supervisor.is_running(task_id),
            run_id: task.run_id,
            last_outcome: task.last_outcome,
            last_error: task.last_error,
            started_at: task.started_at,
            finished_at: task.finished_at,
        })
    }

    /// 分页查询最近一次运行的结果
    ///
    /// # 参数
    ///
    /// * `task_id` - 任务ID
    /// * `page` - 页码，从1开始
    /// * `size` - 每页条数，1到500
    pub async fn get_task_results(
        &self,
        task_id: TaskId,
        page: u64,
        size: u64,
    ) -> Result<Page<TaskResult>, OrchestratorError> {
        let mut violations = Vec::new();
        if page < 1 {
            violations.push("page must be at least 1".to_string());
        }
        if !(1..=MAX_RESULT_PAGE_SIZE).contains(&size) {
            violations.push(format!("size must be between 1 and {MAX_RESULT_PAGE_SIZE}"));
        }
        if !violations.is_empty() {
            return Err(OrchestratorError::Validation(violations));
        }

        let task = self.load(task_id).await?;
        match task.run_id {
            Some(run_id) => Ok(self.results.find_by_run(task_id, run_id, page, size).await?),
            None => Ok(Page::empty(page, size)),
        }
    }

    /// 分页列出任务
    pub async fn list_tasks(&self, page: u64, size: u64) -> Result<Page<Task>, OrchestratorError> {
        Ok(self
            .tasks
            .list(page.max(1), size.clamp(1, MAX_RESULT_PAGE_SIZE))
            .await?)
    }

    /// 控制器启动时清理失去工作进程的任务
    ///
    /// 新的监督器不持有任何进程，数据库中仍为运行中或暂停的任务回到待处理
    pub async fn recover_orphans(&self) -> Result<usize, OrchestratorError> {
        let mut recovered = 0;
        for task in self.tasks.find_active().await? {
            let lock = self.lock_for(task.id);
            let _guard = lock.lock().await;
            if self.supervisor.is_running(task.id) {
                continue;
            }

            let mut task = task;
            task.reset_after_stop("worker lost on controller restart", self.clock.now());
            self.tasks.update(&task).await?;
            warn!(task_id = task.id, "Reset orphaned task to pending");
            recovered += 1;
        }
        Ok(recovered)
    }

    /// 把监督器事件应用到持久化的任务记录
    ///
    /// 只接受当前运行的事件，重复或过期事件不产生影响
    pub async fn apply_event(&self, event: SupervisorEvent) -> Result<(), OrchestratorError> {
        let task_id = event.task_id();
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let Some(mut task) = self.tasks.find_by_id(task_id).await? else {
            warn!(task_id, event = event.name(), "Event for unknown task dropped");
            return Ok(());
        };
        let now = self.clock.now();

        let changed = match event {
            SupervisorEvent::Started { run_id, pid, .. } => {
                // Only refreshes the pid; a stop may already have reset the run.
                task.is_current_run(run_id)
                    && task.status.is_active()
                    && task.start(run_id, pid, now).is_ok()
            }
            SupervisorEvent::Progress {
                run_id, progress, ..
            } => task.record_progress(run_id, progress, now),
            SupervisorEvent::Completed {
                run_id, results, ..
            } => {
                if !task.status.is_active() || !task.is_current_run(run_id) {
                    false
                } else {
                    match self.results.insert_batch(task_id, run_id, results).await {
                        Ok(stored) => {
                            counter!("task_results_stored_total").increment(stored);
                            info!(task_id, %run_id, results = stored, "Task completed");
                            task.complete(run_id, now)
                        }
                        Err(e) => {
                            error!(task_id, %run_id, "Failed to store results: {}", e);
                            task.fail(run_id, format!("failed to store results: {e}"), now)
                        }
                    }
                }
            }
            SupervisorEvent::Failed { run_id, error, .. } => {
                let failed = task.fail(run_id, error, now);
                if failed {
                    info!(task_id, %run_id, "Task failed");
                }
                failed
            }
            SupervisorEvent::Crashed { run_id, reason, .. } => task.record_crash(run_id, reason, now),
            SupervisorEvent::RestartFailed { run_id, error, .. } => {
                task.record_crash(run_id, error, now)
            }
            SupervisorEvent::Restarted { run_id, pid, .. } => task.record_restart(run_id, pid, now),
            SupervisorEvent::GaveUp {
                run_id,
                attempts,
                last_error,
                ..
            } => task.fail(
                run_id,
                format!("gave up after {attempts} restart attempts: {last_error}"),
                now,
            ),
            SupervisorEvent::Paused { run_id, .. } => {
                task.is_current_run(run_id)
                    && task.status == TaskStatus::InProgress
                    && task.pause(now).is_ok()
            }
            SupervisorEvent::Resumed { run_id, .. } => {
                task.is_current_run(run_id)
                    && task.status == TaskStatus::Paused
                    && task.resume(now).is_ok()
            }
            SupervisorEvent::Stopped {
                run_id, outcome, ..
            } => {
                let applies = task.is_current_run(run_id) && task.status.is_active();
                if applies {
                    task.reset_after_stop(format!("stopped ({outcome})"), now);
                }
                applies
            }
            SupervisorEvent::StartFailed { .. } | SupervisorEvent::RestartScheduled { .. } => false,
        };

        if changed {
            self.tasks.update(&task).await?;
        }
        Ok(())
    }

    /// 启动事件循环
    ///
    /// 每个任务一条串行通道，同一任务的事件按顺序应用，不同任务互不阻塞
    ///
    /// # 参数
    ///
    /// * `events` - 监督器事件接收端
    /// * `shutdown` - 值变为 `true` 或发送端关闭时退出
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let mut lanes: HashMap<TaskId, mpsc::UnboundedSender<SupervisorEvent>> = HashMap::new();

            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let task_id = event.task_id();
                        let lane = lanes
                            .entry(task_id)
                            .or_insert_with(|| orchestrator.spawn_lane(task_id));

                        if let Err(mpsc::error::SendError(event)) = lane.send(event) {
                            let lane = orchestrator.spawn_lane(task_id);
                            if lane.send(event).is_err() {
                                error!(task_id, "Event lane unavailable, event dropped");
                            }
                            lanes.insert(task_id, lane);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(lanes = lanes.len(), "Task event loop stopped");
        })
    }

    fn spawn_lane(self: &Arc<Self>, task_id: TaskId) -> mpsc::UnboundedSender<SupervisorEvent> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<SupervisorEvent>();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let name = event.name();
                if let Err(e) = orchestrator.apply_event(event).await {
                    error!(task_id, event = name, "Failed to apply supervisor event: {}", e);
                }
            }
        });
        sender
    }
}

#[async_trait]
impl ScheduleTarget for TaskOrchestrator {
    async fn lookup_task(&self, task_id: TaskId) -> Result<Option<Task>, OrchestratorError> {
        Ok(self.tasks.find_by_id(task_id).await?)
    }

    async fn fire(&self, task_id: TaskId) -> Result<(), OrchestratorError> {
        self.start_task(task_id).await.map(|_| ())
    }
}
