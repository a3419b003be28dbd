// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{eventually, fast_policy, next_event_matching};
use scrapeflow::domain::models::task::{TaskConfig, TaskId, TaskType};
use scrapeflow::ipc::message::{PlatformTarget, WorkerAssignment};
use scrapeflow::workers::{
    ProcessLauncher, ProcessSupervisor, RecoveryPolicy, StopOutcome, SupervisorEvent,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WORKER: &str = env!("CARGO_BIN_EXE_scrape-worker");

fn assignment(task_id: TaskId, server: &MockServer, task_type: TaskType) -> WorkerAssignment {
    WorkerAssignment {
        task_id,
        run_id: Uuid::new_v4(),
        task_type,
        config: TaskConfig {
            platform: "directory".to_string(),
            keywords: vec!["plumber".to_string()],
            location: Some("Austin".to_string()),
            max_pages: 3,
            concurrency: 1,
            delay_ms: 0,
            account_id: None,
            proxy_id: None,
        },
        target: PlatformTarget {
            url_template: format!("{}/search?q={{keyword}}&loc={{location}}&page={{page}}", server.uri()),
            result_selector: ".listing".to_string(),
        },
        proxy_url: None,
        account_label: None,
        resume: false,
    }
}

fn policy() -> RecoveryPolicy {
    RecoveryPolicy {
        startup_timeout: Duration::from_secs(10),
        stop_grace: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(5),
        ..fast_policy()
    }
}

fn supervisor() -> (ProcessSupervisor, scrapeflow::workers::events::EventReceiver) {
    ProcessSupervisor::new(Arc::new(ProcessLauncher::new(WORKER)), policy())
}

async fn serve_page(server: &MockServer, page: u32, body: &str) {
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "plumber"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

/// 测试真实工作进程完成抓取并通过IPC返回结果
#[tokio::test]
async fn test_worker_process_scrapes_until_results_run_out() {
    let server = MockServer::start().await;
    serve_page(
        &server,
        1,
        r#"<div class="listing"><a href="/biz/ace">Ace Plumbing</a></div>
           <div class="listing"><a href="/biz/best">Best Pipes</a></div>"#,
    )
    .await;
    serve_page(
        &server,
        2,
        r#"<div class="listing"><a href="/biz/city">City Drains</a></div>"#,
    )
    .await;
    serve_page(&server, 3, "<p>No more results</p>").await;

    let (supervisor, mut events) = supervisor();
    let started = supervisor
        .start(assignment(1, &server, TaskType::DirectoryScrape))
        .await
        .unwrap();
    assert!(started.pid.is_some());

    let completed = next_event_matching(&mut events, |e| {
        matches!(e, SupervisorEvent::Completed { .. } | SupervisorEvent::Failed { .. })
    })
    .await;

    let results = match completed {
        SupervisorEvent::Completed { results, .. } => results,
        other => panic!("unexpected event {other:?}"),
    };
    let titles: Vec<&str> = results
        .iter()
        .filter_map(|r| r["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Ace Plumbing", "Best Pipes", "City Drains"]);
    assert_eq!(results[0]["keyword"], "plumber");
    assert_eq!(results[0]["page"], 1);
    assert_eq!(
        results[2]["url"],
        Value::String(format!("{}/biz/city", server.uri()))
    );

    let supervisor = &supervisor;
    eventually("worker process to exit", || async move {
        !supervisor.is_running(1)
    })
    .await;
}

#[tokio::test]
async fn test_email_extraction_keeps_only_contacts() {
    let server = MockServer::start().await;
    serve_page(
        &server,
        1,
        r#"<div class="listing">Ace Plumbing <a href="mailto:Hello@Ace.test">Hello@Ace.test</a></div>
           <div class="listing">No contact here</div>"#,
    )
    .await;
    serve_page(&server, 2, "").await;

    let (supervisor, mut events) = supervisor();
    supervisor
        .start(assignment(2, &server, TaskType::EmailExtraction))
        .await
        .unwrap();

    let event = next_event_matching(&mut events, |e| {
        matches!(e, SupervisorEvent::Completed { .. } | SupervisorEvent::Failed { .. })
    })
    .await;

    match event {
        SupervisorEvent::Completed { results, .. } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0]["emails"], serde_json::json!(["hello@ace.test"]));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_fails_without_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (supervisor, mut events) = supervisor();
    supervisor
        .start(assignment(3, &server, TaskType::DirectoryScrape))
        .await
        .unwrap();

    let mut restarted = false;
    let event = next_event_matching(&mut events, |e| {
        restarted |= matches!(e, SupervisorEvent::Restarted { .. });
        matches!(e, SupervisorEvent::Completed { .. } | SupervisorEvent::Failed { .. })
    })
    .await;

    match event {
        SupervisorEvent::Failed { error, .. } => assert!(error.contains("404"), "{error}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!restarted);
}

/// 测试抓取进行中收到 STOP 时进程优雅退出
#[tokio::test]
async fn test_stop_interrupts_slow_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<div class="listing">Slow</div>"#)
                .set_delay(Duration::from_secs(60)),
        )
        .mount(&server)
        .await;

    let (supervisor, _events) = supervisor();
    supervisor
        .start(assignment(4, &server, TaskType::DirectoryScrape))
        .await
        .unwrap();

    assert_eq!(supervisor.stop(4).await, StopOutcome::Graceful);
    assert!(!supervisor.is_running(4));
}
