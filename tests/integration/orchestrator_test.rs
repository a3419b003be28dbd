// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::fake_worker::{FakeLauncher, Script};
use super::helpers::{task_request, OrchestratorHarness};
use chrono::Utc;
use scrapeflow::domain::models::task::{TaskStatus, TaskType};
use scrapeflow::domain::repositories::task_repository::TaskRepository;
use scrapeflow::utils::errors::OrchestratorError;
use scrapeflow::workers::StopOutcome;
use serde_json::json;
use uuid::Uuid;

fn validation_messages(result: Result<impl std::fmt::Debug, OrchestratorError>) -> Vec<String> {
    match result {
        Err(OrchestratorError::Validation(messages)) => messages,
        other => panic!("expected validation error, got {other:?}"),
    }
}

/// 测试任务配置校验会一次返回全部问题
#[tokio::test]
async fn test_create_task_reports_every_violation() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let inactive = harness.add_account("retired@example.com", false).await;

    let mut request = task_request("broken");
    request.keywords = vec![];
    request.account_id = Some(inactive.id);
    request.proxy_id = Some(99);

    let messages = validation_messages(harness.orchestrator.create_task(request).await);

    assert!(messages.contains(&"keywords required".to_string()), "{messages:?}");
    assert!(messages.contains(&format!("account {} is inactive", inactive.id)));
    assert!(messages.contains(&"proxy 99 does not exist".to_string()));

    let listed = harness.orchestrator.list_tasks(1, 10).await.unwrap();
    assert_eq!(listed.total, 0);
}

#[tokio::test]
async fn test_create_task_checks_platform_capabilities() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;

    let mut unknown = task_request("nowhere");
    unknown.platform = "nowhere".to_string();
    assert_eq!(
        validation_messages(harness.orchestrator.create_task(unknown).await),
        vec!["platform 'nowhere' does not exist".to_string()]
    );

    let mut unsupported = task_request("search");
    unsupported.task_type = TaskType::SearchEngineScrape;
    assert_eq!(
        validation_messages(harness.orchestrator.create_task(unsupported).await),
        vec!["platform 'directory' does not support search_engine_scrape".to_string()]
    );

    let proxy = harness.add_proxy("http://10.0.0.2:3128", true).await;
    let mut valid = task_request("  austin plumbers  ");
    valid.proxy_id = Some(proxy.id);
    let task = harness.orchestrator.create_task(valid).await.unwrap();
    assert_eq!(task.name, "austin plumbers");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.config.proxy_id, Some(proxy.id));
}

#[tokio::test]
async fn test_start_persists_running_task() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let task = harness.create("running").await;

    let started = harness.orchestrator.start_task(task.id).await.unwrap();
    assert_eq!(started.status, TaskStatus::InProgress);
    assert!(started.worker_pid.is_some());
    assert!(started.run_id.is_some());
    assert!(started.started_at.is_some());

    let err = harness.orchestrator.start_task(task.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyRunning(id) if id == task.id));

    let status = harness.orchestrator.get_task_status(task.id).await.unwrap();
    assert!(status.worker_alive);
    assert_eq!(status.status, TaskStatus::InProgress);
    assert_eq!(status.worker_pid, started.worker_pid);
}

/// 测试完成事件写入结果，并且查询只返回最近一次运行
#[tokio::test]
async fn test_completed_run_stores_results_for_latest_run() {
    let launcher = FakeLauncher::scripted(
        vec![Script::Complete(vec![
            json!({"title": "Ace Plumbing"}),
            json!({"title": "Best Pipes"}),
            json!({"title": "City Drains"}),
        ])],
        Script::Complete(vec![json!({"title": "Second Run"})]),
    );
    let harness = OrchestratorHarness::new(launcher).await;
    let task = harness.create("complete").await;

    harness.orchestrator.start_task(task.id).await.unwrap();
    let finished = harness.wait_for_status(task.id, TaskStatus::Completed).await;

    assert_eq!(finished.last_outcome, Some(TaskStatus::Completed));
    assert_eq!(finished.worker_pid, None);
    assert!(finished.finished_at.is_some());
    assert_eq!(finished.progress.map(|p| p.current_page), Some(2));

    let page = harness
        .orchestrator
        .get_task_results(task.id, 1, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].payload["title"], "Ace Plumbing");

    assert_eq!(
        validation_messages(harness.orchestrator.get_task_results(task.id, 0, 2).await),
        vec!["page must be at least 1".to_string()]
    );
    assert_eq!(
        validation_messages(harness.orchestrator.get_task_results(task.id, 1, 501).await),
        vec!["size must be between 1 and 500".to_string()]
    );

    // Completed tasks may run again under a new run.
    harness.wait_for_worker_exit(task.id).await;
    let rerun = harness.orchestrator.start_task(task.id).await.unwrap();
    assert_ne!(rerun.run_id, finished.run_id);
    harness.wait_for_status(task.id, TaskStatus::Completed).await;

    let page = harness
        .orchestrator
        .get_task_results(task.id, 1, 10)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].payload["title"], "Second Run");
}

#[tokio::test]
async fn test_results_of_never_started_task_are_empty() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let task = harness.create("idle").await;

    let page = harness
        .orchestrator
        .get_task_results(task.id, 1, 50)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total, 0);

    assert!(matches!(
        harness.orchestrator.get_task_results(12345, 1, 50).await,
        Err(OrchestratorError::NotFound(12345))
    ));
}

#[tokio::test]
async fn test_startup_failure_keeps_task_pending() {
    let launcher = FakeLauncher::new(Script::ExitBeforeAck(1));
    let harness = OrchestratorHarness::new(launcher.clone()).await;
    let task = harness.create("doomed").await;

    let err = harness.orchestrator.start_task(task.id).await.unwrap_err();
    assert!(
        matches!(err, OrchestratorError::StartupFailure { attempts: 3, .. }),
        "{err:?}"
    );
    assert_eq!(launcher.launches(), 3);

    let stored = harness.task(task.id).await;
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.run_id, None);
    let last_error = stored.last_error.unwrap();
    assert!(last_error.contains("failed to start after 3 attempts"), "{last_error}");
    assert!(!harness.orchestrator.supervisor().is_running(task.id));
}

#[tokio::test]
async fn test_stop_returns_task_to_pending() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let task = harness.create("stoppable").await;
    harness.orchestrator.start_task(task.id).await.unwrap();

    let outcome = harness.orchestrator.stop_task(task.id).await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);

    let stored = harness.task(task.id).await;
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.worker_pid, None);
    assert_eq!(stored.last_error.as_deref(), Some("stopped (graceful)"));
    assert!(!harness.orchestrator.supervisor().is_running(task.id));

    // Second stop is a no-op.
    assert_eq!(
        harness.orchestrator.stop_task(task.id).await.unwrap(),
        StopOutcome::NotRunning
    );
    assert_eq!(
        harness.task(task.id).await.last_error.as_deref(),
        Some("stopped (graceful)")
    );
}

#[tokio::test]
async fn test_stop_on_idle_task_changes_nothing() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let task = harness.create("idle").await;

    assert_eq!(
        harness.orchestrator.stop_task(task.id).await.unwrap(),
        StopOutcome::NotRunning
    );
    let stored = harness.task(task.id).await;
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.last_error, None);
}

#[tokio::test]
async fn test_pause_and_resume_round_trip() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let harness = OrchestratorHarness::new(launcher.clone()).await;
    let task = harness.create("pausable").await;

    let err = harness.orchestrator.pause_task(task.id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            status: TaskStatus::Pending,
            action: "pause",
            ..
        }
    ));

    harness.orchestrator.start_task(task.id).await.unwrap();

    let paused = harness.orchestrator.pause_task(task.id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    let again = harness.orchestrator.pause_task(task.id).await.unwrap();
    assert_eq!(again.status, TaskStatus::Paused);
    assert!(harness.orchestrator.supervisor().is_running(task.id));

    let err = harness.orchestrator.start_task(task.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState { action: "start", .. }));

    let resumed = harness.orchestrator.resume_task(task.id).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::InProgress);
    assert_eq!(resumed.run_id, paused.run_id);
    assert_eq!(launcher.launches(), 1);

    let status = harness.orchestrator.get_task_status(task.id).await.unwrap();
    assert_eq!(status.status, TaskStatus::InProgress);
}

/// 测试重启次数耗尽后任务标记为失败
#[tokio::test]
async fn test_exhausted_restarts_fail_the_task() {
    let launcher = FakeLauncher::new(Script::CrashAfterAck(139));
    let harness = OrchestratorHarness::new(launcher.clone()).await;
    let task = harness.create("crashy").await;

    harness.orchestrator.start_task(task.id).await.unwrap();
    let failed = harness.wait_for_status(task.id, TaskStatus::Failed).await;

    assert_eq!(failed.last_outcome, Some(TaskStatus::Failed));
    let last_error = failed.last_error.unwrap();
    assert!(
        last_error.starts_with("gave up after 3 restart attempts"),
        "{last_error}"
    );
    assert!(last_error.contains("139"), "{last_error}");
    assert_eq!(launcher.launches(), 4);
    assert!(!harness.orchestrator.supervisor().is_running(task.id));
}

#[tokio::test]
async fn test_non_recoverable_error_fails_the_task() {
    let launcher = FakeLauncher::new(Script::Fatal("selector matched nothing".to_string()));
    let harness = OrchestratorHarness::new(launcher.clone()).await;
    let task = harness.create("fatal").await;

    harness.orchestrator.start_task(task.id).await.unwrap();
    let failed = harness.wait_for_status(task.id, TaskStatus::Failed).await;

    assert_eq!(failed.last_error.as_deref(), Some("selector matched nothing"));
    harness.wait_for_worker_exit(task.id).await;
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_orphaned_tasks_are_reset_on_recovery() {
    let harness = OrchestratorHarness::new(FakeLauncher::new(Script::Obedient)).await;
    let orphan = harness.create("orphan").await;
    let live = harness.create("live").await;
    let idle = harness.create("idle").await;

    let mut stale = orphan.clone();
    stale.start(Uuid::new_v4(), Some(31337), Utc::now()).unwrap();
    harness.tasks.update(&stale).await.unwrap();
    harness.orchestrator.start_task(live.id).await.unwrap();

    let recovered = harness.orchestrator.recover_orphans().await.unwrap();
    assert_eq!(recovered, 1);

    let reset = harness.task(orphan.id).await;
    assert_eq!(reset.status, TaskStatus::Pending);
    assert_eq!(reset.worker_pid, None);
    assert_eq!(
        reset.last_error.as_deref(),
        Some("worker lost on controller restart")
    );
    assert_eq!(harness.task(live.id).await.status, TaskStatus::InProgress);
    assert_eq!(harness.task(idle.id).await.status, TaskStatus::Pending);
}
