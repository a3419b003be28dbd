// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::TaskId;
use crate::ipc::message::{Message, WorkerAssignment};
use crate::utils::errors::SupervisorError;
use crate::workers::crash::{classify_exit, detect_critical, ExitClass};
use crate::workers::events::{EventReceiver, EventSender, StopOutcome, SupervisorEvent};
use crate::workers::handle::{HandleState, Terminal, WorkerHandle, WorkerInfo};
use crate::workers::launcher::{WorkerLauncher, WorkerOutput, WorkerProcess};
use crate::workers::recovery::{RecoveryPolicy, RestartDecision};
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type Slot = Arc<Mutex<Option<WorkerHandle>>>;

/// 启动成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedWorker {
    pub run_id: Uuid,
    pub pid: Option<u32>,
}

/// 进程监督器
///
/// 唯一允许创建、通知和终止工作进程的组件。任务ID到句柄的映射按任务加锁，
/// 不同任务之间互不阻塞。
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    launcher: Arc<dyn WorkerLauncher>,
    policy: RecoveryPolicy,
    slots: DashMap<TaskId, Slot>,
    /// 持有句柄的任务，供无锁查询
    live: DashMap<TaskId, Uuid>,
    events: EventSender,
    generations: AtomicU64,
}

/// 已确认启动的进程以及确认期间收到的输出
struct Launched {
    process: WorkerProcess,
    backlog: Vec<WorkerOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Detach,
}

impl ProcessSupervisor {
    /// 创建监督器
    ///
    /// # 参数
    ///
    /// * `launcher` - 工作进程启动器
    /// * `policy` - 恢复策略
    ///
    /// # 返回值
    ///
    /// 返回监督器以及生命周期事件的接收端
    pub fn new(launcher: Arc<dyn WorkerLauncher>, policy: RecoveryPolicy) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let supervisor = Self {
            inner: Arc::new(Inner {
                launcher,
                policy,
                slots: DashMap::new(),
                live: DashMap::new(),
                events,
                generations: AtomicU64::new(0),
            }),
        };
        (supervisor, receiver)
    }

    /// 当前恢复策略
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.inner.policy
    }

    /// 启动工作进程
    ///
    /// 在收到启动确认或启动窗口内没有致命信号后返回。
    /// 首次启动失败按指数退避重试，全部失败后返回 `StartupFailure`。
    #[instrument(skip(self, assignment), fields(task_id = assignment.task_id, run_id = %assignment.run_id))]
    pub async fn start(&self, assignment: WorkerAssignment) -> Result<StartedWorker, SupervisorError> {
        self.inner.start(assignment).await
    }

    /// 停止工作进程
    ///
    /// 先发送 STOP，宽限期内未退出则强制终止。对未运行的任务是空操作。
    #[instrument(skip(self))]
    pub async fn stop(&self, task_id: TaskId) -> StopOutcome {
        self.inner.stop(task_id).await
    }

    /// 暂停工作进程，进程保持存活
    pub async fn pause(&self, task_id: TaskId) -> Result<(), SupervisorError> {
        self.inner.pause(task_id).await
    }

    /// 恢复已暂停的工作进程
    pub async fn resume(&self, task_id: TaskId) -> Result<(), SupervisorError> {
        self.inner.resume(task_id).await
    }

    /// 任务是否持有工作进程句柄
    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.inner.live.contains_key(&task_id)
    }

    /// 持有句柄的任务数
    pub fn count(&self) -> usize {
        self.inner.live.len()
    }

    /// 句柄快照
    pub async fn worker_info(&self, task_id: TaskId) -> Option<WorkerInfo> {
        let slot = self.inner.existing_slot(task_id)?;
        let guard = slot.lock().await;
        guard.as_ref().map(WorkerHandle::info)
    }

    /// 停止全部工作进程
    pub async fn shutdown(&self) -> Vec<(TaskId, StopOutcome)> {
        let task_ids: Vec<TaskId> = self.inner.live.iter().map(|entry| *entry.key()).collect();
        info!(workers = task_ids.len(), "Stopping all workers");

        join_all(
            task_ids
                .into_iter()
                .map(|task_id| async move { (task_id, self.stop(task_id).await) }),
        )
        .await
    }
}

impl Inner {
    fn slot(&self, task_id: TaskId) -> Slot {
        self.slots
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone()
    }

    fn existing_slot(&self, task_id: TaskId) -> Option<Slot> {
        self.slots.get(&task_id).map(|slot| slot.value().clone())
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            debug!("Supervisor event dropped, no subscriber");
        }
    }

    fn update_gauge(&self) {
        gauge!("workers_active").set(self.live.len() as f64);
    }

    fn clear(&self, slot: &mut Option<WorkerHandle>, task_id: TaskId) {
        *slot = None;
        self.live.remove(&task_id);
        self.update_gauge();
    }

    async fn start(
        self: &Arc<Self>,
        assignment: WorkerAssignment,
    ) -> Result<StartedWorker, SupervisorError> {
        let task_id = assignment.task_id;
        let run_id = assignment.run_id;
        let slot = self.slot(task_id);
        let mut guard = slot.lock().await;

        // A finished run may still be winding down its process.
        if let Some(handle) = guard.as_mut().filter(|h| h.terminal.is_some()) {
            debug!(task_id, previous_run = %handle.run_id, "Releasing finished worker before new run");
            handle.force_kill();
            self.clear(&mut guard, task_id);
        }

        if guard.is_some() {
            warn!(task_id, "Rejected start, worker already live");
            return Err(SupervisorError::AlreadyRunning(task_id));
        }

        let attempts = self.policy.startup_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.launch_confirmed(&assignment).await {
                Ok(launched) => {
                    let pid = launched.process.pid;
                    let generation = self.next_generation();
                    let Launched { process, backlog } = launched;
                    let WorkerProcess {
                        pid: _,
                        commands,
                        output,
                        kill,
                    } = process;

                    *guard = Some(WorkerHandle::new(assignment, generation, pid, commands, kill));
                    self.live.insert(task_id, run_id);
                    self.update_gauge();
                    self.spawn_monitor(task_id, generation, output, backlog);

                    info!(task_id, %run_id, ?pid, attempt, "Worker started");
                    counter!("worker_started_total").increment(1);
                    self.emit(SupervisorEvent::Started {
                        task_id,
                        run_id,
                        pid,
                    });
                    return Ok(StartedWorker { run_id, pid });
                }
                Err(error) => {
                    warn!(task_id, %run_id, attempt, error = %error, "Worker failed to start");
                    counter!("worker_start_failures_total").increment(1);
                    self.emit(SupervisorEvent::StartFailed {
                        task_id,
                        run_id,
                        attempt,
                        error: error.clone(),
                    });
                    last_error = error;

                    if let Some(delay) = self.policy.startup_backoff(attempt) {
                        debug!(task_id, ?delay, "Backing off before next start attempt");
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(task_id, %run_id, attempts, last_error = %last_error, "Giving up on starting worker");
        Err(SupervisorError::StartupFailure {
            task_id,
            attempts,
            last_error,
        })
    }

    /// 拉起进程、发送 START 并等待确认
    ///
    /// 第一条 PROGRESS（或 COMPLETED）即为确认；窗口结束时进程仍存活且没有致命输出也视为成功
    async fn launch_confirmed(&self, assignment: &WorkerAssignment) -> Result<Launched, String> {
        let task_id = assignment.task_id;
        let mut process = self
            .launcher
            .launch(task_id)
            .await
            .map_err(|e| e.to_string())?;
        debug!(task_id, pid = ?process.pid, "Worker process spawned");

        if process
            .commands
            .send(Message::start(assignment.clone()))
            .await
            .is_err()
        {
            return Err("worker closed its input before START".to_string());
        }

        let mut backlog = Vec::new();
        let window = sleep(self.policy.startup_timeout);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => {
                    debug!(task_id, "Startup window elapsed without fatal signal");
                    break;
                }
                output = process.output.recv() => match output {
                    Some(WorkerOutput::Frame(Message::Error { error, .. })) => {
                        let _ = process.kill.send(());
                        return Err(error);
                    }
                    Some(WorkerOutput::Frame(frame)) => {
                        let acknowledged =
                            matches!(frame, Message::Progress { .. } | Message::Completed { .. });
                        backlog.push(WorkerOutput::Frame(frame));
                        if acknowledged {
                            break;
                        }
                    }
                    Some(WorkerOutput::Stderr(line)) => {
                        if let Some(signature) = detect_critical(&line) {
                            let _ = process.kill.send(());
                            return Err(format!("{signature}: {line}"));
                        }
                        backlog.push(WorkerOutput::Stderr(line));
                    }
                    Some(WorkerOutput::Exited(code)) => return Err(describe_exit(code, None)),
                    None => return Err("worker output closed during startup".to_string()),
                }
            }
        }

        Ok(Launched { process, backlog })
    }

    fn spawn_monitor(
        self: &Arc<Self>,
        task_id: TaskId,
        generation: u64,
        mut output: mpsc::Receiver<WorkerOutput>,
        backlog: Vec<WorkerOutput>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            for item in backlog {
                if inner.handle_output(task_id, generation, item).await == Flow::Detach {
                    return;
                }
            }

            while let Some(item) = output.recv().await {
                if inner.handle_output(task_id, generation, item).await == Flow::Detach {
                    return;
                }
            }

            // Output closed without an exit notice.
            inner
                .handle_output(task_id, generation, WorkerOutput::Exited(None))
                .await;
        });
    }

    async fn handle_output(
        self: &Arc<Self>,
        task_id: TaskId,
        generation: u64,
        output: WorkerOutput,
    ) -> Flow {
        let Some(slot) = self.existing_slot(task_id) else {
            return Flow::Detach;
        };
        let mut guard = slot.lock().await;
        let Some(handle) = guard.as_mut() else {
            return Flow::Detach;
        };
        if handle.generation != generation {
            return Flow::Detach;
        }

        handle.last_seen_alive = Instant::now();
        let run_id = handle.run_id;

        match output {
            WorkerOutput::Frame(Message::Progress { progress, .. }) => {
                if handle.terminal.is_some() {
                    debug!(task_id, %run_id, "Discarding progress after terminal message");
                    return Flow::Continue;
                }

                if handle.restart_attempts > 0
                    && handle.launched_at.elapsed() >= self.policy.stable_after
                {
                    info!(
                        task_id,
                        %run_id,
                        restarts = handle.restart_attempts,
                        "Worker stable again, restart counter reset"
                    );
                    handle.restart_attempts = 0;
                }

                self.emit(SupervisorEvent::Progress {
                    task_id,
                    run_id,
                    progress,
                });
                Flow::Continue
            }
            WorkerOutput::Frame(Message::Completed { results, .. }) => {
                if handle.terminal.is_some() || handle.state == HandleState::Stopping {
                    debug!(task_id, %run_id, "Ignoring COMPLETED after terminal message or stop");
                    return Flow::Continue;
                }

                handle.terminal = Some(Terminal::Completed);
                handle.restart_attempts = 0;
                info!(task_id, %run_id, results = results.len(), "Worker completed");
                counter!("worker_completed_total").increment(1);
                self.emit(SupervisorEvent::Completed {
                    task_id,
                    run_id,
                    results,
                });
                Flow::Continue
            }
            WorkerOutput::Frame(Message::Error {
                error, recoverable, ..
            }) => {
                if handle.terminal.is_some() || handle.state == HandleState::Stopping {
                    debug!(task_id, %run_id, "Ignoring ERROR after terminal message or stop");
                    return Flow::Continue;
                }

                if recoverable {
                    warn!(task_id, %run_id, error = %error, "Worker reported recoverable error");
                    handle.force_kill();
                    self.on_crash(&mut guard, None, error);
                    return Flow::Detach;
                }

                handle.terminal = Some(Terminal::Failed);
                handle.last_error = Some(error.clone());
                error!(task_id, %run_id, error = %error, "Worker failed");
                counter!("worker_failed_total").increment(1);
                self.emit(SupervisorEvent::Failed {
                    task_id,
                    run_id,
                    error,
                });
                Flow::Continue
            }
            WorkerOutput::Frame(other) => {
                warn!(task_id, kind = %other.kind(), "Ignoring controller-bound frame from worker");
                Flow::Continue
            }
            WorkerOutput::Stderr(line) => {
                let watching = handle.state != HandleState::Stopping && handle.terminal.is_none();
                if watching {
                    if let Some(signature) = detect_critical(&line) {
                        error!(task_id, %run_id, %signature, line = %line, "Critical signature on worker stderr");
                        handle.force_kill();
                        self.on_crash(&mut guard, None, format!("{signature}: {line}"));
                        return Flow::Detach;
                    }
                }

                debug!(task_id, line = %line, "worker stderr");
                if !line.trim().is_empty() {
                    handle.last_stderr = Some(line);
                }
                Flow::Continue
            }
            WorkerOutput::Exited(code) => {
                let stop_requested = handle.state == HandleState::Stopping;
                match classify_exit(stop_requested, handle.terminal.is_some()) {
                    ExitClass::Stopped => {
                        if let Some(notify) = handle.exit_notify.take() {
                            let _ = notify.send(code);
                        }
                    }
                    ExitClass::Finished => {
                        debug!(task_id, %run_id, ?code, "Worker exited after terminal message");
                        self.clear(&mut guard, task_id);
                    }
                    ExitClass::Crashed => {
                        let reason = describe_exit(code, handle.last_stderr.as_deref());
                        self.on_crash(&mut guard, code, reason);
                    }
                }
                Flow::Detach
            }
        }
    }

    /// 运行期崩溃的恢复状态机
    fn on_crash(self: &Arc<Self>, slot: &mut Option<WorkerHandle>, exit_code: Option<i32>, reason: String) {
        let Some(handle) = slot.as_mut() else {
            return;
        };
        let task_id = handle.task_id;
        let run_id = handle.run_id;

        warn!(task_id, %run_id, ?exit_code, reason = %reason, "Worker crashed");
        counter!("worker_crashes_total").increment(1);
        self.emit(SupervisorEvent::Crashed {
            task_id,
            run_id,
            exit_code,
            reason: reason.clone(),
        });
        handle.pid = None;

        match self.policy.on_crash(handle.restart_attempts) {
            RestartDecision::Restart { attempt, delay } => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                handle.restart_attempts = attempt;
                handle.state = HandleState::Restarting;
                handle.last_error = Some(reason);
                handle.pending_restart = Some(cancel_tx);

                info!(task_id, %run_id, attempt, ?delay, "Scheduling worker restart");
                self.emit(SupervisorEvent::RestartScheduled {
                    task_id,
                    run_id,
                    attempt,
                    delay,
                });
                self.spawn_restart(task_id, handle.generation, delay, cancel_rx);
            }
            RestartDecision::GiveUp { attempts } => {
                error!(task_id, %run_id, attempts, last_error = %reason, "Restart budget exhausted, giving up");
                counter!("worker_give_ups_total").increment(1);
                self.emit(SupervisorEvent::GaveUp {
                    task_id,
                    run_id,
                    attempts,
                    last_error: reason,
                });
                self.clear(slot, task_id);
            }
        }
    }

    fn spawn_restart(
        self: &Arc<Self>,
        task_id: TaskId,
        generation: u64,
        delay: Duration,
        cancel: oneshot::Receiver<()>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel => {
                    debug!(task_id, "Pending restart cancelled");
                    return;
                }
            }
            inner.restart(task_id, generation).await;
        });
    }

    async fn restart(self: &Arc<Self>, task_id: TaskId, generation: u64) {
        let Some(slot) = self.existing_slot(task_id) else {
            return;
        };
        let mut guard = slot.lock().await;
        let Some(handle) = guard.as_mut() else {
            return;
        };
        if handle.generation != generation || handle.state != HandleState::Restarting {
            return;
        }

        handle.pending_restart = None;
        let attempt = handle.restart_attempts;
        let run_id = handle.run_id;
        let mut assignment = handle.assignment.clone();
        assignment.resume = false;

        match self.launch_confirmed(&assignment).await {
            Ok(Launched { process, backlog }) => {
                let next = self.next_generation();
                let WorkerProcess {
                    pid,
                    commands,
                    output,
                    kill,
                } = process;
                handle.attach(next, pid, commands, kill);
                self.spawn_monitor(task_id, next, output, backlog);

                info!(task_id, %run_id, attempt, ?pid, "Worker restarted");
                counter!("worker_restarts_total").increment(1);
                self.emit(SupervisorEvent::Restarted {
                    task_id,
                    run_id,
                    attempt,
                    pid,
                });
            }
            Err(error) => {
                warn!(task_id, %run_id, attempt, error = %error, "Worker restart failed");
                self.emit(SupervisorEvent::RestartFailed {
                    task_id,
                    run_id,
                    attempt,
                    error: error.clone(),
                });
                self.on_crash(&mut guard, None, error);
            }
        }
    }

    async fn stop(self: &Arc<Self>, task_id: TaskId) -> StopOutcome {
        let Some(slot) = self.existing_slot(task_id) else {
            return StopOutcome::NotRunning;
        };

        let (generation, run_id, mut exit_rx, outcome_tx) = {
            let mut guard = slot.lock().await;
            let Some(handle) = guard.as_mut() else {
                return StopOutcome::NotRunning;
            };

            match handle.state {
                HandleState::Restarting => {
                    let run_id = handle.run_id;
                    handle.pending_restart.take();
                    self.clear(&mut guard, task_id);
                    info!(task_id, %run_id, "Stopped while restart was pending");
                    self.record_stop(task_id, run_id, StopOutcome::Graceful);
                    return StopOutcome::Graceful;
                }
                HandleState::Stopping => {
                    // Another caller owns the stop sequence.
                    let Some(mut waiter) = handle.stop_outcome.clone() else {
                        return StopOutcome::NotRunning;
                    };
                    drop(guard);
                    let outcome = match waiter.wait_for(Option::is_some).await {
                        Ok(value) => *value,
                        Err(_) => None,
                    };
                    return outcome.unwrap_or(StopOutcome::NotRunning);
                }
                HandleState::Running | HandleState::Paused => {}
            }

            let (exit_tx, exit_rx) = oneshot::channel();
            let (outcome_tx, outcome_rx) = watch::channel(None);
            handle.state = HandleState::Stopping;
            handle.exit_notify = Some(exit_tx);
            handle.stop_outcome = Some(outcome_rx);

            if handle
                .commands
                .send(Message::Stop { task_id })
                .await
                .is_err()
            {
                debug!(task_id, "STOP not delivered, worker input already closed");
            }

            (handle.generation, handle.run_id, exit_rx, outcome_tx)
        };

        let mut outcome = StopOutcome::Graceful;
        if timeout(self.policy.stop_grace, &mut exit_rx).await.is_err() {
            outcome = StopOutcome::Forced;
            warn!(task_id, %run_id, grace = ?self.policy.stop_grace, "Worker ignored STOP, killing");
            {
                let mut guard = slot.lock().await;
                if let Some(handle) = guard.as_mut().filter(|h| h.generation == generation) {
                    handle.force_kill();
                }
            }
            if timeout(self.policy.kill_timeout, &mut exit_rx).await.is_err() {
                error!(task_id, %run_id, "Worker did not exit after kill");
            }
        }

        {
            let mut guard = slot.lock().await;
            if guard.as_ref().is_some_and(|h| h.generation == generation) {
                self.clear(&mut guard, task_id);
            }
        }

        info!(task_id, %run_id, %outcome, "Worker stopped");
        self.record_stop(task_id, run_id, outcome);
        let _ = outcome_tx.send(Some(outcome));
        outcome
    }

    fn record_stop(&self, task_id: TaskId, run_id: Uuid, outcome: StopOutcome) {
        counter!("worker_stops_total", "mode" => outcome.to_string()).increment(1);
        self.emit(SupervisorEvent::Stopped {
            task_id,
            run_id,
            outcome,
        });
    }

    async fn pause(&self, task_id: TaskId) -> Result<(), SupervisorError> {
        let slot = self
            .existing_slot(task_id)
            .ok_or(SupervisorError::NotRunning(task_id))?;
        let mut guard = slot.lock().await;
        let handle = guard
            .as_mut()
            .filter(|h| h.terminal.is_none())
            .ok_or(SupervisorError::NotRunning(task_id))?;

        match handle.state {
            HandleState::Paused => return Ok(()),
            HandleState::Running => {}
            HandleState::Stopping | HandleState::Restarting => {
                return Err(SupervisorError::NotRunning(task_id))
            }
        }

        handle
            .commands
            .send(Message::Pause { task_id })
            .await
            .map_err(|_| SupervisorError::ChannelClosed(task_id))?;
        handle.state = HandleState::Paused;

        let run_id = handle.run_id;
        info!(task_id, %run_id, "Worker paused");
        self.emit(SupervisorEvent::Paused { task_id, run_id });
        Ok(())
    }

    async fn resume(&self, task_id: TaskId) -> Result<(), SupervisorError> {
        let slot = self
            .existing_slot(task_id)
            .ok_or(SupervisorError::NotRunning(task_id))?;
        let mut guard = slot.lock().await;
        let handle = guard
            .as_mut()
            .filter(|h| h.terminal.is_none())
            .ok_or(SupervisorError::NotRunning(task_id))?;

        match handle.state {
            HandleState::Running => return Ok(()),
            HandleState::Paused => {}
            HandleState::Stopping | HandleState::Restarting => {
                return Err(SupervisorError::NotRunning(task_id))
            }
        }

        let mut assignment = handle.assignment.clone();
        assignment.resume = true;
        handle
            .commands
            .send(Message::start(assignment))
            .await
            .map_err(|_| SupervisorError::ChannelClosed(task_id))?;
        handle.state = HandleState::Running;

        let run_id = handle.run_id;
        info!(task_id, %run_id, "Worker resumed");
        self.emit(SupervisorEvent::Resumed { task_id, run_id });
        Ok(())
    }
}

fn describe_exit(code: Option<i32>, last_stderr: Option<&str>) -> String {
    let base = match code {
        Some(code) => format!("worker exited with code {code}"),
        None => "worker terminated without exit code".to_string(),
    };
    match last_stderr {
        Some(line) => format!("{base}: {line}"),
        None => base,
    }
}
