// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::fake_worker::{FakeLauncher, Script};
use super::helpers::{eventually, fast_policy, next_event_matching};
use futures::future::join_all;
use scrapeflow::domain::models::task::{TaskConfig, TaskId, TaskType};
use scrapeflow::ipc::message::{Message, PlatformTarget, WorkerAssignment};
use scrapeflow::utils::errors::SupervisorError;
use scrapeflow::workers::handle::HandleState;
use scrapeflow::workers::{ProcessSupervisor, RecoveryPolicy, StopOutcome, SupervisorEvent};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

fn assignment(task_id: TaskId) -> WorkerAssignment {
    WorkerAssignment {
        task_id,
        run_id: Uuid::new_v4(),
        task_type: TaskType::DirectoryScrape,
        config: TaskConfig {
            platform: "directory".to_string(),
            keywords: vec!["plumber".to_string()],
            location: None,
            max_pages: 2,
            concurrency: 1,
            delay_ms: 0,
            account_id: None,
            proxy_id: None,
        },
        target: PlatformTarget {
            url_template: "https://directory.test/?q={keyword}&p={page}".to_string(),
            result_selector: ".listing".to_string(),
        },
        proxy_url: None,
        account_label: None,
        resume: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_while_worker_is_live() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, _events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    let started = supervisor.start(assignment(1)).await.unwrap();
    assert!(started.pid.is_some());

    let err = supervisor.start(assignment(1)).await.unwrap_err();
    assert_eq!(err, SupervisorError::AlreadyRunning(1));
    assert_eq!(supervisor.count(), 1);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_spawn_a_single_worker() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, _events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    let results = join_all((0..8).map(|_| supervisor.start(assignment(5)))).await;

    let started = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(started, 1);
    for result in &results {
        if let Err(err) = result {
            assert_eq!(err, &SupervisorError::AlreadyRunning(5));
        }
    }
    assert_eq!(launcher.launches(), 1);
    assert_eq!(supervisor.count(), 1);
    assert!(supervisor.is_running(5));
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_worker_is_a_no_op() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, _events) = ProcessSupervisor::new(launcher, fast_policy());

    assert_eq!(supervisor.stop(42).await, StopOutcome::NotRunning);
    assert_eq!(supervisor.stop(42).await, StopOutcome::NotRunning);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_releases_handle() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), fast_policy());
    let run = assignment(1);
    let run_id = run.run_id;

    supervisor.start(run).await.unwrap();
    assert!(supervisor.is_running(1));

    assert_eq!(supervisor.stop(1).await, StopOutcome::Graceful);
    assert!(!supervisor.is_running(1));
    assert_eq!(supervisor.count(), 0);

    let stopped = next_event_matching(&mut events, |e| matches!(e, SupervisorEvent::Stopped { .. })).await;
    assert_eq!(
        stopped,
        SupervisorEvent::Stopped {
            task_id: 1,
            run_id,
            outcome: StopOutcome::Graceful
        }
    );
    assert!(launcher
        .commands()
        .iter()
        .any(|m| matches!(m, Message::Stop { task_id: 1 })));
}

#[tokio::test(start_paused = true)]
async fn test_worker_ignoring_stop_is_killed() {
    let launcher = FakeLauncher::new(Script::Stubborn);
    let (supervisor, _events) = ProcessSupervisor::new(launcher, fast_policy());

    supervisor.start(assignment(1)).await.unwrap();
    let started = Instant::now();

    assert_eq!(supervisor.stop(1).await, StopOutcome::Forced);
    assert!(started.elapsed() >= fast_policy().stop_grace);
    assert!(!supervisor.is_running(1));
}

#[tokio::test(start_paused = true)]
async fn test_runtime_crashes_are_restarted_until_completion() {
    let launcher = FakeLauncher::scripted(
        vec![Script::CrashAfterAck(1), Script::CrashAfterAck(1)],
        Script::Complete(vec![json!({"title": "Ace Plumbing"})]),
    );
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), fast_policy());
    let run = assignment(1);
    let run_id = run.run_id;

    supervisor.start(run).await.unwrap();

    let mut seen = Vec::new();
    let completed = next_event_matching(&mut events, |e| {
        seen.push(e.clone());
        matches!(e, SupervisorEvent::Completed { .. })
    })
    .await;

    match completed {
        SupervisorEvent::Completed {
            run_id: completed_run,
            results,
            ..
        } => {
            assert_eq!(completed_run, run_id);
            assert_eq!(results, vec![json!({"title": "Ace Plumbing"})]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let crashes = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Crashed { .. }))
        .count();
    let restarts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::Restarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();

    assert_eq!(crashes, 2);
    assert_eq!(restarts, vec![1, 2]);
    assert!(!seen.iter().any(|e| matches!(e, SupervisorEvent::GaveUp { .. })));
    assert_eq!(launcher.launches(), 3);

    let supervisor = &supervisor;
    eventually("worker to exit", || async move { !supervisor.is_running(1) }).await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_budget_is_bounded() {
    let launcher = FakeLauncher::new(Script::CrashAfterAck(137));
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    supervisor.start(assignment(9)).await.unwrap();

    let gave_up = next_event_matching(&mut events, |e| matches!(e, SupervisorEvent::GaveUp { .. })).await;
    match gave_up {
        SupervisorEvent::GaveUp {
            task_id,
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(task_id, 9);
            assert_eq!(attempts, 3);
            assert!(last_error.contains("137"), "{last_error}");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Initial launch plus three restarts, then nothing more.
    assert_eq!(launcher.launches(), 4);
    assert!(!supervisor.is_running(9));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(launcher.launches(), 4);
}

fn stable_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        stable_after: Duration::from_secs(5),
        ..fast_policy()
    }
}

#[tokio::test(start_paused = true)]
async fn test_restart_counter_resets_once_worker_is_stable() {
    let launcher = FakeLauncher::scripted(
        vec![
            Script::CrashAfterAck(1),
            Script::CrashAfterAck(1),
            Script::Steady {
                after: Duration::from_secs(6),
                then_crash: None,
            },
        ],
        Script::Obedient,
    );
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), stable_policy());

    supervisor.start(assignment(6)).await.unwrap();

    next_event_matching(&mut events, |e| {
        matches!(e, SupervisorEvent::Restarted { attempt: 2, .. })
    })
    .await;
    let info = supervisor.worker_info(6).await.unwrap();
    assert_eq!(info.restart_attempts, 2);
    assert_eq!(info.state, HandleState::Running);

    next_event_matching(&mut events, |e| {
        matches!(e, SupervisorEvent::Progress { progress, .. } if progress.current_page == 1)
    })
    .await;
    let info = supervisor.worker_info(6).await.unwrap();
    assert_eq!(info.restart_attempts, 0);
    assert_eq!(launcher.launches(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_full_restart_budget_is_available_after_reset() {
    let launcher = FakeLauncher::scripted(
        vec![
            Script::CrashAfterAck(1),
            Script::CrashAfterAck(1),
            Script::Steady {
                after: Duration::from_secs(6),
                then_crash: Some(1),
            },
            Script::CrashAfterAck(1),
            Script::CrashAfterAck(1),
        ],
        Script::Complete(vec![json!({"title": "Best Pipes"})]),
    );
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), stable_policy());

    supervisor.start(assignment(7)).await.unwrap();

    let mut restarts = Vec::new();
    let finished = next_event_matching(&mut events, |e| {
        if let SupervisorEvent::Restarted { attempt, .. } = e {
            restarts.push(*attempt);
        }
        matches!(
            e,
            SupervisorEvent::Completed { .. } | SupervisorEvent::GaveUp { .. }
        )
    })
    .await;

    assert!(
        matches!(finished, SupervisorEvent::Completed { task_id: 7, .. }),
        "{finished:?}"
    );
    // Two restarts before the stable run, then three more after the reset.
    assert_eq!(restarts, vec![1, 2, 1, 2, 3]);
    assert_eq!(launcher.launches(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_critical_stderr_counts_as_crash() {
    let launcher = FakeLauncher::scripted(
        vec![Script::Stderr(
            "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory"
                .to_string(),
        )],
        Script::Obedient,
    );
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    supervisor.start(assignment(3)).await.unwrap();

    let crashed = next_event_matching(&mut events, |e| matches!(e, SupervisorEvent::Crashed { .. })).await;
    match crashed {
        SupervisorEvent::Crashed { reason, .. } => assert!(reason.starts_with("out of memory"), "{reason}"),
        other => panic!("unexpected event {other:?}"),
    }

    next_event_matching(&mut events, |e| matches!(e, SupervisorEvent::Restarted { .. })).await;
    assert_eq!(launcher.launches(), 2);
    assert!(supervisor.is_running(3));
}

#[tokio::test(start_paused = true)]
async fn test_startup_backs_off_exponentially_then_fails() {
    let launcher = FakeLauncher::new(Script::ExitBeforeAck(1));
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), RecoveryPolicy::default());
    let started = Instant::now();

    let err = supervisor.start(assignment(5)).await.unwrap_err();

    match err {
        SupervisorError::StartupFailure {
            task_id, attempts, ..
        } => {
            assert_eq!(task_id, 5);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    // 2s after the first failure, 4s after the second.
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(launcher.launches(), 3);
    assert!(!supervisor.is_running(5));

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SupervisorEvent::StartFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 3);
}

#[tokio::test(start_paused = true)]
async fn test_startup_recovers_on_later_attempt() {
    let launcher = FakeLauncher::scripted(
        vec![Script::SpawnError, Script::ExitBeforeAck(1)],
        Script::Obedient,
    );
    let (supervisor, _events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    let started = supervisor.start(assignment(5)).await.unwrap();

    assert_eq!(started.pid, Some(40_003));
    assert_eq!(launcher.launches(), 3);
    assert!(supervisor.is_running(5));
}

#[tokio::test(start_paused = true)]
async fn test_non_recoverable_error_fails_without_restart() {
    let launcher = FakeLauncher::scripted(
        vec![Script::Fatal("invalid result selector".to_string())],
        Script::Obedient,
    );
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    supervisor.start(assignment(4)).await.unwrap();

    let failed = next_event_matching(&mut events, |e| matches!(e, SupervisorEvent::Failed { .. })).await;
    match failed {
        SupervisorEvent::Failed { error, .. } => assert_eq!(error, "invalid result selector"),
        other => panic!("unexpected event {other:?}"),
    }

    let supervisor = &supervisor;
    eventually("worker to exit", || async move { !supervisor.is_running(4) }).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_keep_process_alive() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, _events) = ProcessSupervisor::new(launcher.clone(), fast_policy());

    assert_eq!(
        supervisor.pause(1).await.unwrap_err(),
        SupervisorError::NotRunning(1)
    );

    supervisor.start(assignment(1)).await.unwrap();
    supervisor.pause(1).await.unwrap();
    assert_eq!(
        supervisor.worker_info(1).await.unwrap().state,
        HandleState::Paused
    );

    supervisor.resume(1).await.unwrap();
    assert_eq!(
        supervisor.worker_info(1).await.unwrap().state,
        HandleState::Running
    );
    assert_eq!(launcher.launches(), 1);

    let launcher = &launcher;
    eventually("resume START to reach the worker", || async move {
        launcher
            .commands()
            .iter()
            .any(|m| matches!(m, Message::Start { assignment, .. } if assignment.resume))
    })
    .await;
    assert!(launcher
        .commands()
        .iter()
        .any(|m| matches!(m, Message::Pause { task_id: 1 })));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_restart() {
    let launcher = FakeLauncher::scripted(vec![Script::CrashAfterAck(1)], Script::Obedient);
    let policy = RecoveryPolicy {
        restart_delay: Duration::from_secs(30),
        ..fast_policy()
    };
    let (supervisor, mut events) = ProcessSupervisor::new(launcher.clone(), policy);

    supervisor.start(assignment(2)).await.unwrap();
    next_event_matching(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartScheduled { .. })
    })
    .await;

    assert_eq!(supervisor.stop(2).await, StopOutcome::Graceful);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(launcher.launches(), 1);
    assert!(!supervisor.is_running(2));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_worker() {
    let launcher = FakeLauncher::new(Script::Obedient);
    let (supervisor, _events) = ProcessSupervisor::new(launcher, fast_policy());

    supervisor.start(assignment(1)).await.unwrap();
    supervisor.start(assignment(2)).await.unwrap();
    assert_eq!(supervisor.count(), 2);

    let mut outcomes = supervisor.shutdown().await;
    outcomes.sort_by_key(|(task_id, _)| *task_id);

    assert_eq!(
        outcomes,
        vec![(1, StopOutcome::Graceful), (2, StopOutcome::Graceful)]
    );
    assert_eq!(supervisor.count(), 0);
}
