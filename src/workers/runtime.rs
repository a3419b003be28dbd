// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::progress::ProgressSnapshot;
use crate::domain::models::task::TaskId;
use crate::ipc::codec::{FrameReader, FrameWriter};
use crate::ipc::message::{Message, WorkerAssignment};
use crate::utils::errors::{ExtractionError, IpcError};
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::extractor::{HttpPageExtractor, PageExtractor, PageRequest, ScrapedRecord};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// 根据任务分配创建页面抓取器
pub type ExtractorFactory = Box<
    dyn Fn(&WorkerAssignment) -> Result<Arc<dyn PageExtractor>, ExtractionError> + Send + Sync,
>;

/// 工作进程一次运行的结局
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// 已发送 COMPLETED
    Completed { results: usize },
    /// 收到 STOP 后退出
    Stopped,
    /// 已发送 ERROR
    Failed { error: String, recoverable: bool },
    /// 控制器断开
    Disconnected,
}

impl RunOutcome {
    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } | RunOutcome::Stopped => 0,
            RunOutcome::Failed {
                recoverable: true, ..
            } => 1,
            RunOutcome::Failed {
                recoverable: false, ..
            } => 2,
            RunOutcome::Disconnected => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Stop,
    Pause,
    Resume,
}

/// 工作进程运行时
///
/// 从输入读取控制消息，按关键词逐页抓取，并在输出上报告进度与结果
pub struct WorkerRuntime {
    factory: ExtractorFactory,
    retry: RetryPolicy,
}

impl WorkerRuntime {
    /// 创建运行时
    ///
    /// # 参数
    ///
    /// * `factory` - 页面抓取器工厂
    pub fn new(factory: ExtractorFactory) -> Self {
        Self {
            factory,
            retry: RetryPolicy::page_fetch(),
        }
    }

    /// 使用HTTP抓取器的运行时
    pub fn http() -> Self {
        Self::new(Box::new(|assignment: &WorkerAssignment| {
            let extractor = HttpPageExtractor::new(
                assignment.target.clone(),
                assignment.task_type,
                assignment.proxy_url.as_deref(),
            )?;
            Ok(Arc::new(extractor) as Arc<dyn PageExtractor>)
        }))
    }

    /// 替换单页重试策略
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 执行一次运行
    ///
    /// # 参数
    ///
    /// * `input` - 控制器下发消息的输入流
    /// * `output` - 上报消息的输出流
    ///
    /// # 返回值
    ///
    /// 运行结局，决定进程退出码
    pub async fn run<R, W>(&self, input: R, output: W) -> RunOutcome
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let mut reader = FrameReader::new(input);
        let mut writer = FrameWriter::new(output);

        let assignment = match wait_for_start(&mut reader).await {
            Some(Ok(assignment)) => assignment,
            Some(Err(outcome)) => return outcome,
            None => return RunOutcome::Disconnected,
        };

        let task_id = assignment.task_id;
        info!(
            task_id,
            run_id = %assignment.run_id,
            task_type = %assignment.task_type,
            account = assignment.account_label.as_deref().unwrap_or("-"),
            "Worker received assignment"
        );

        let controls = spawn_control_reader(reader, task_id);
        let mut run = Run {
            task_id,
            writer: &mut writer,
            controls,
            paused: false,
        };

        match run.execute(&assignment, &self.factory, &self.retry).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(task_id, error = %e, "Lost connection to controller");
                RunOutcome::Disconnected
            }
        }
    }
}

/// 等待第一条 START；在此之前收到 STOP 直接结束
async fn wait_for_start<R>(
    reader: &mut FrameReader<R>,
) -> Option<Result<WorkerAssignment, RunOutcome>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.next_frame().await {
            Ok(Some(Message::Start { assignment, .. })) => return Some(Ok(*assignment)),
            Ok(Some(Message::Stop { task_id })) => {
                info!(task_id, "Stopped before START");
                return Some(Err(RunOutcome::Stopped));
            }
            Ok(Some(other)) => {
                debug!(kind = %other.kind(), "Ignoring frame before START");
            }
            Ok(None) => return None,
            Err(IpcError::Decode(e)) => warn!(error = %e, "Dropping malformed frame"),
            Err(e) => {
                warn!(error = %e, "Controller input failed");
                return None;
            }
        }
    }
}

fn spawn_control_reader<R>(mut reader: FrameReader<R>, task_id: TaskId) -> mpsc::Receiver<Control>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let control = match reader.next_frame().await {
                Ok(Some(frame)) if frame.task_id() != task_id => {
                    warn!(task_id, other = frame.task_id(), "Ignoring frame for another task");
                    continue;
                }
                Ok(Some(Message::Stop { .. })) => Control::Stop,
                Ok(Some(Message::Pause { .. })) => Control::Pause,
                Ok(Some(Message::Start { .. })) => Control::Resume,
                Ok(Some(other)) => {
                    debug!(task_id, kind = %other.kind(), "Ignoring worker-bound frame");
                    continue;
                }
                Ok(None) => break,
                Err(IpcError::Decode(e)) => {
                    warn!(task_id, error = %e, "Dropping malformed frame");
                    continue;
                }
                Err(_) => break,
            };

            if tx.send(control).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// 单次运行的可变状态
struct Run<'a, W> {
    task_id: TaskId,
    writer: &'a mut FrameWriter<W>,
    controls: mpsc::Receiver<Control>,
    paused: bool,
}

impl<W: AsyncWrite + Unpin> Run<'_, W> {
    async fn execute(
        &mut self,
        assignment: &WorkerAssignment,
        factory: &ExtractorFactory,
        retry: &RetryPolicy,
    ) -> Result<RunOutcome, IpcError> {
        let config = &assignment.config;
        let mut total_pages = config.total_pages();
        let started = Instant::now();

        // First PROGRESS doubles as the startup acknowledgement.
        self.send(Message::Progress {
            task_id: self.task_id,
            progress: ProgressSnapshot::starting(Some(total_pages)),
        })
        .await?;

        let extractor = match factory(assignment) {
            Ok(extractor) => extractor,
            Err(e) => return self.fail(e).await,
        };

        let concurrency = config.concurrency.max(1) as usize;
        let delay = Duration::from_millis(config.delay_ms);
        let mut pages_done: u32 = 0;
        let mut records: Vec<ScrapedRecord> = Vec::new();
        let mut first_batch = true;

        for keyword in &config.keywords {
            let pages: Vec<u32> = (1..=config.max_pages).collect();

            for batch in pages.chunks(concurrency) {
                if !first_batch
                    && !delay.is_zero()
                    && self.pause_aware_sleep(delay).await == Some(Control::Stop)
                {
                    return Ok(RunOutcome::Stopped);
                }
                first_batch = false;

                if self.paused && self.wait_resumed().await == Control::Stop {
                    return Ok(RunOutcome::Stopped);
                }

                let requests: Vec<PageRequest> = batch
                    .iter()
                    .map(|page| PageRequest {
                        keyword: keyword.clone(),
                        location: config.location.clone(),
                        page: *page,
                    })
                    .collect();

                let Some(mut outcomes) = self
                    .fetch_batch(extractor.as_ref(), requests, retry, concurrency)
                    .await
                else {
                    return Ok(RunOutcome::Stopped);
                };
                outcomes.sort_by_key(|(page, _)| *page);

                let mut exhausted_at = None;
                for (page, outcome) in outcomes {
                    match outcome {
                        Ok(found) if found.is_empty() => {
                            exhausted_at = Some(exhausted_at.map_or(page, |p: u32| p.min(page)));
                        }
                        Ok(found) => records.extend(found),
                        Err(e) => return self.fail(e).await,
                    }
                }

                pages_done += batch.len() as u32;

                if let Some(page) = exhausted_at {
                    let skipped = config.max_pages.saturating_sub(*batch.last().unwrap_or(&page));
                    total_pages = total_pages.saturating_sub(skipped);
                    debug!(task_id = self.task_id, keyword = %keyword, page, "Keyword exhausted");
                }

                let progress =
                    ProgressSnapshot::new(pages_done, Some(total_pages), records.len() as u64)
                        .with_elapsed(started.elapsed());
                self.send(Message::Progress {
                    task_id: self.task_id,
                    progress,
                })
                .await?;

                if exhausted_at.is_some() {
                    break;
                }
            }
        }

        let results: Vec<Value> = records
            .iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(task_id = self.task_id, error = %e, "Dropping unserializable record");
                    None
                }
            })
            .collect();
        let count = results.len();

        info!(task_id = self.task_id, results = count, pages = pages_done, "Run completed");
        self.send(Message::Completed {
            task_id: self.task_id,
            results,
        })
        .await?;

        Ok(RunOutcome::Completed { results: count })
    }

    /// 并发抓取一批页面，期间收到 STOP 返回 `None`
    async fn fetch_batch(
        &mut self,
        extractor: &dyn PageExtractor,
        requests: Vec<PageRequest>,
        retry: &RetryPolicy,
        concurrency: usize,
    ) -> Option<Vec<(u32, Result<Vec<ScrapedRecord>, ExtractionError>)>> {
        let task_id = self.task_id;
        let batch = stream::iter(requests)
            .map(|request| async move {
                let outcome = fetch_with_retry(extractor, &request, retry, task_id).await;
                (request.page, outcome)
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>();
        tokio::pin!(batch);

        loop {
            tokio::select! {
                outcomes = &mut batch => return Some(outcomes),
                control = self.controls.recv() => match control {
                    Some(Control::Pause) => {
                        info!(task_id, "Pause requested, finishing current batch");
                        self.paused = true;
                    }
                    Some(Control::Resume) => self.paused = false,
                    Some(Control::Stop) | None => {
                        info!(task_id, "Stop requested, abandoning current batch");
                        return None;
                    }
                }
            }
        }
    }

    /// 批次间隔，期间响应控制消息
    async fn pause_aware_sleep(&mut self, delay: Duration) -> Option<Control> {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return None,
                control = self.controls.recv() => match control {
                    Some(Control::Pause) => self.paused = true,
                    Some(Control::Resume) => self.paused = false,
                    Some(Control::Stop) | None => return Some(Control::Stop),
                }
            }
        }
    }

    /// 阻塞直到恢复或停止
    async fn wait_resumed(&mut self) -> Control {
        info!(task_id = self.task_id, "Worker paused");
        loop {
            match self.controls.recv().await {
                Some(Control::Resume) => {
                    info!(task_id = self.task_id, "Worker resumed");
                    self.paused = false;
                    return Control::Resume;
                }
                Some(Control::Pause) => continue,
                Some(Control::Stop) | None => return Control::Stop,
            }
        }
    }

    async fn fail(&mut self, error: ExtractionError) -> Result<RunOutcome, IpcError> {
        let recoverable = error.is_recoverable();
        let message = error.to_string();
        error!(task_id = self.task_id, error = %message, recoverable, "Run failed");

        self.send(Message::Error {
            task_id: self.task_id,
            error: message.clone(),
            recoverable,
        })
        .await?;

        Ok(RunOutcome::Failed {
            error: message,
            recoverable,
        })
    }

    async fn send(&mut self, message: Message) -> Result<(), IpcError> {
        self.writer.send(&message).await
    }
}

async fn fetch_with_retry(
    extractor: &dyn PageExtractor,
    request: &PageRequest,
    retry: &RetryPolicy,
    task_id: TaskId,
) -> Result<Vec<ScrapedRecord>, ExtractionError> {
    let mut attempt = 1;
    loop {
        match extractor.extract(request).await {
            Ok(records) => return Ok(records),
            Err(e) if e.is_recoverable() => match retry.next_backoff(attempt) {
                Some(backoff) => {
                    warn!(
                        task_id,
                        keyword = %request.keyword,
                        page = request.page,
                        attempt,
                        ?backoff,
                        error = %e,
                        "Page fetch failed, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
