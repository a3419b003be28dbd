// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::{platform, setup_db};
use chrono::{TimeZone, Utc};
use scrapeflow::domain::models::progress::ProgressSnapshot;
use scrapeflow::domain::models::schedule::{DependencyCondition, NewSchedule, TriggerType};
use scrapeflow::domain::models::task::{NewTask, TaskConfig, TaskStatus, TaskType};
use scrapeflow::domain::repositories::reference_repository::ReferenceRepository;
use scrapeflow::domain::repositories::schedule_repository::ScheduleRepository;
use scrapeflow::domain::repositories::task_repository::{RepositoryError, TaskRepository};
use scrapeflow::domain::repositories::task_result_repository::TaskResultRepository;
use scrapeflow::domain::models::reference::{Account, Proxy};
use scrapeflow::infrastructure::repositories::reference_repo_impl::ReferenceRepositoryImpl;
use scrapeflow::infrastructure::repositories::schedule_repo_impl::ScheduleRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_result_repo_impl::TaskResultRepositoryImpl;
use serde_json::json;
use uuid::Uuid;

fn new_task(name: &str) -> NewTask {
    NewTask {
        name: name.to_string(),
        task_type: TaskType::DirectoryScrape,
        config: TaskConfig {
            platform: "directory".to_string(),
            keywords: vec!["plumber".to_string(), "electrician".to_string()],
            location: Some("Austin".to_string()),
            max_pages: 3,
            concurrency: 2,
            delay_ms: 500,
            account_id: None,
            proxy_id: None,
        },
    }
}

fn new_schedule(task_id: i64, is_active: bool) -> NewSchedule {
    NewSchedule {
        name: format!("nightly {task_id}"),
        description: None,
        task_type: TaskType::DirectoryScrape,
        task_id,
        trigger_type: TriggerType::Cron,
        cron_expression: Some("0 2 * * *".to_string()),
        run_at: None,
        is_active,
        dependency_condition: DependencyCondition::None,
        depends_on_task_id: None,
        delay_minutes: 0,
        next_run_at: Some(Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 0).unwrap()),
    }
}

/// 测试任务的创建与完整状态回写
#[tokio::test]
async fn test_task_round_trips_through_database() {
    let db = setup_db().await;
    let repo = TaskRepositoryImpl::new(db);

    let created = repo.create(&new_task("austin plumbers")).await.unwrap();
    assert!(created.id > 0);
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.config.total_pages(), 6);

    let mut task = created.clone();
    let run_id = Uuid::new_v4();
    task.start(run_id, Some(4242), Utc::now()).unwrap();
    assert!(task.record_progress(run_id, ProgressSnapshot::new(2, Some(6), 17), Utc::now()));
    repo.update(&task).await.unwrap();

    let stored = repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::InProgress);
    assert_eq!(stored.run_id, Some(run_id));
    assert_eq!(stored.worker_pid, Some(4242));
    assert_eq!(stored.progress, Some(ProgressSnapshot::new(2, Some(6), 17)));
    assert_eq!(stored.config, created.config);

    task.fail(run_id, "worker exited with code 1", Utc::now());
    repo.update(&task).await.unwrap();

    let stored = repo.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.last_outcome, Some(TaskStatus::Failed));
    assert_eq!(stored.last_error.as_deref(), Some("worker exited with code 1"));
    assert_eq!(stored.worker_pid, None);
    assert!(stored.finished_at.is_some());
}

#[tokio::test]
async fn test_updating_missing_task_is_not_found() {
    let db = setup_db().await;
    let repo = TaskRepositoryImpl::new(db);

    let mut task = repo.create(&new_task("ghost")).await.unwrap();
    task.id = 999;

    assert!(matches!(
        repo.update(&task).await,
        Err(RepositoryError::NotFound)
    ));
    assert!(repo.find_by_id(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_listing_is_paged_and_active_filter_applies() {
    let db = setup_db().await;
    let repo = TaskRepositoryImpl::new(db);

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(repo.create(&new_task(&format!("task {i}"))).await.unwrap().id);
    }

    let mut running = repo.find_by_id(ids[1]).await.unwrap().unwrap();
    running.start(Uuid::new_v4(), Some(1), Utc::now()).unwrap();
    repo.update(&running).await.unwrap();

    let mut paused = repo.find_by_id(ids[3]).await.unwrap().unwrap();
    paused.start(Uuid::new_v4(), Some(2), Utc::now()).unwrap();
    paused.pause(Utc::now()).unwrap();
    repo.update(&paused).await.unwrap();

    let page = repo.list(2, 2).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(
        page.items.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[2], ids[3]]
    );

    let active: Vec<_> = repo
        .find_active()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(active, vec![ids[1], ids[3]]);
}

/// 测试结果按运行隔离并分页
#[tokio::test]
async fn test_results_are_scoped_to_run() {
    let db = setup_db().await;
    let tasks = TaskRepositoryImpl::new(db.clone());
    let results = TaskResultRepositoryImpl::new(db);
    let task = tasks.create(&new_task("results")).await.unwrap();

    let first_run = Uuid::new_v4();
    let second_run = Uuid::new_v4();
    let payloads: Vec<_> = (0..7).map(|i| json!({"title": format!("Listing {i}")})).collect();

    assert_eq!(
        results.insert_batch(task.id, first_run, payloads).await.unwrap(),
        7
    );
    assert_eq!(
        results
            .insert_batch(task.id, second_run, vec![json!({"title": "Other"})])
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        results.insert_batch(task.id, second_run, vec![]).await.unwrap(),
        0
    );

    let page = results.find_by_run(task.id, first_run, 2, 3).await.unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.page, 2);
    let titles: Vec<_> = page
        .items
        .iter()
        .map(|r| r.payload["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Listing 3", "Listing 4", "Listing 5"]);
    assert!(page.items.iter().all(|r| r.run_id == first_run));

    let tail = results.find_by_run(task.id, first_run, 3, 3).await.unwrap();
    assert_eq!(tail.items.len(), 1);

    let other = results.find_by_run(task.id, second_run, 1, 10).await.unwrap();
    assert_eq!(other.total, 1);
}

#[tokio::test]
async fn test_schedule_crud_and_active_filter() {
    let db = setup_db().await;
    let tasks = TaskRepositoryImpl::new(db.clone());
    let schedules = ScheduleRepositoryImpl::new(db);
    let task = tasks.create(&new_task("scheduled")).await.unwrap();

    let active = schedules.create(&new_schedule(task.id, true)).await.unwrap();
    let inactive = schedules.create(&new_schedule(task.id, false)).await.unwrap();
    assert_eq!(active.fire_count, 0);
    assert_eq!(active.next_run_at, new_schedule(task.id, true).next_run_at);

    let mut fired = active.clone();
    let now = Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 5).unwrap();
    fired.record_fire(now, Some(Utc.with_ymd_and_hms(2025, 3, 3, 2, 0, 0).unwrap()));
    schedules.update(&fired).await.unwrap();

    let stored = schedules.find_by_id(active.id).await.unwrap().unwrap();
    assert_eq!(stored.fire_count, 1);
    assert_eq!(stored.last_run_at, Some(now));
    assert_eq!(
        stored.next_run_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 3, 2, 0, 0).unwrap())
    );

    let due: Vec<_> = schedules
        .find_active()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(due, vec![active.id]);
    assert_eq!(schedules.list().await.unwrap().len(), 2);

    assert!(schedules.delete(inactive.id).await.unwrap());
    assert!(!schedules.delete(inactive.id).await.unwrap());
    assert!(schedules.find_by_id(inactive.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reference_data_lookup() {
    let db = setup_db().await;
    let references = ReferenceRepositoryImpl::new(db);

    let stored = references
        .create_platform(&platform(
            "yellow",
            vec![TaskType::DirectoryScrape, TaskType::EmailExtraction],
        ))
        .await
        .unwrap();
    let found = references.find_platform("yellow").await.unwrap().unwrap();
    assert_eq!(found, stored);
    assert!(found.supports(TaskType::EmailExtraction));
    assert!(!found.supports(TaskType::SearchEngineScrape));
    assert!(references.find_platform("unknown").await.unwrap().is_none());

    let account = references
        .create_account(&Account {
            id: 0,
            label: "ops@example.com".to_string(),
            platform_key: Some("yellow".to_string()),
            is_active: false,
        })
        .await
        .unwrap();
    assert_eq!(
        references.find_account(account.id).await.unwrap(),
        Some(account)
    );

    let proxy = references
        .create_proxy(&Proxy {
            id: 0,
            url: "http://10.0.0.1:3128".to_string(),
            is_active: true,
        })
        .await
        .unwrap();
    let proxy_id = proxy.id;
    assert_eq!(references.find_proxy(proxy_id).await.unwrap(), Some(proxy));
    assert!(references.find_proxy(proxy_id + 1).await.unwrap().is_none());
}
