// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.


use migration::{Migrator, MigratorTrait};
use scrapeflow::application::dto::task_request::CreateTaskRequest;
use scrapeflow::application::TaskOrchestrator;
use scrapeflow::config::settings::DatabaseSettings;
use scrapeflow::domain::models::reference::{Account, Platform, Proxy};
use scrapeflow::domain::models::task::{Task, TaskId, TaskStatus, TaskType};
use scrapeflow::domain::repositories::reference_repository::ReferenceRepository;
use scrapeflow::domain::repositories::task_repository::TaskRepository;
use scrapeflow::infrastructure::database::connection;
use scrapeflow::infrastructure::repositories::reference_repo_impl::ReferenceRepositoryImpl;
use scrapeflow::infrastructure::repositories::schedule_repo_impl::ScheduleRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_result_repo_impl::TaskResultRepositoryImpl;
use scrapeflow::utils::clock::{Clock, SystemClock};
use scrapeflow::utils::retry_policy::RetryPolicy;
use scrapeflow::workers::events::{EventReceiver, SupervisorEvent};
use scrapeflow::workers::launcher::WorkerLauncher;
use scrapeflow::workers::{ProcessSupervisor, RecoveryPolicy};
use sea_orm::DatabaseConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const PLATFORM: &str = "directory";

/// 测试用的快速恢复策略
pub fn fast_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        max_restart_attempts: 3,
        restart_delay: Duration::from_millis(20),
        startup: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
        startup_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_millis(200),
        kill_timeout: Duration::from_millis(200),
        stable_after: Duration::from_secs(60),
    }
}

/// 创建已迁移的内存数据库
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let settings = DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        max_connections: Some(1),
        min_connections: Some(1),
        connect_timeout: Some(10),
        idle_timeout: None,
    };

    let db = connection::create_pool(&settings)
        .await
        .expect("Failed to connect to in-memory database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    Arc::new(db)
}

pub fn platform(key: &str, task_types: Vec<TaskType>) -> Platform {
    Platform {
        id: 0,
        key: key.to_string(),
        name: format!("{key} listings"),
        task_types,
        url_template: "https://directory.test/search?q={keyword}&page={page}".to_string(),
        result_selector: ".listing".to_string(),
        is_active: true,
    }
}

pub fn task_request(name: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        name: name.to_string(),
        task_type: TaskType::DirectoryScrape,
        platform: PLATFORM.to_string(),
        keywords: vec!["plumber".to_string()],
        location: Some("Austin".to_string()),
        max_pages: 2,
        concurrency: 1,
        delay_ms: 0,
        account_id: None,
        proxy_id: None,
    }
}

/// 轮询直到条件成立，超时则测试失败
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// 收集事件直到满足条件
pub async fn next_event_matching<P>(events: &mut EventReceiver, mut predicate: P) -> SupervisorEvent
where
    P: FnMut(&SupervisorEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("supervisor event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected supervisor event did not arrive")
}

/// 连接真实仓库与指定启动器的编排器环境
#[allow(dead_code)]
pub struct OrchestratorHarness {
    pub db: Arc<DatabaseConnection>,
    pub orchestrator: Arc<TaskOrchestrator>,
    pub tasks: Arc<TaskRepositoryImpl>,
    pub references: Arc<ReferenceRepositoryImpl>,
    pub schedules: Arc<ScheduleRepositoryImpl>,
    pub shutdown: watch::Sender<bool>,
    pub event_loop: JoinHandle<()>,
}

impl OrchestratorHarness {
    pub async fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::with_policy(launcher, fast_policy()).await
    }

    pub async fn with_policy(launcher: Arc<dyn WorkerLauncher>, policy: RecoveryPolicy) -> Self {
        Self::build(launcher, policy, Arc::new(SystemClock)).await
    }

    /// 编排器使用指定时钟，便于和调度器共享时间
    pub async fn with_clock(launcher: Arc<dyn WorkerLauncher>, clock: Arc<dyn Clock>) -> Self {
        Self::build(launcher, fast_policy(), clock).await
    }

    async fn build(
        launcher: Arc<dyn WorkerLauncher>,
        policy: RecoveryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let db = setup_db().await;
        let tasks = Arc::new(TaskRepositoryImpl::new(db.clone()));
        let results = Arc::new(TaskResultRepositoryImpl::new(db.clone()));
        let references = Arc::new(ReferenceRepositoryImpl::new(db.clone()));
        let schedules = Arc::new(ScheduleRepositoryImpl::new(db.clone()));

        references
            .create_platform(&platform(
                PLATFORM,
                vec![TaskType::DirectoryScrape, TaskType::EmailExtraction],
            ))
            .await
            .unwrap();

        let (supervisor, events) = ProcessSupervisor::new(launcher, policy);
        let orchestrator = Arc::new(
            TaskOrchestrator::new(tasks.clone(), results, references.clone(), supervisor)
                .with_clock(clock),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let event_loop = orchestrator.spawn_event_loop(events, shutdown_rx);

        Self {
            db,
            orchestrator,
            tasks,
            references,
            schedules,
            shutdown,
            event_loop,
        }
    }

    pub async fn add_account(&self, label: &str, is_active: bool) -> Account {
        self.references
            .create_account(&Account {
                id: 0,
                label: label.to_string(),
                platform_key: Some(PLATFORM.to_string()),
                is_active,
            })
            .await
            .unwrap()
    }

    pub async fn add_proxy(&self, url: &str, is_active: bool) -> Proxy {
        self.references
            .create_proxy(&Proxy {
                id: 0,
                url: url.to_string(),
                is_active,
            })
            .await
            .unwrap()
    }

    pub async fn create(&self, name: &str) -> Task {
        self.orchestrator
            .create_task(task_request(name))
            .await
            .unwrap()
    }

    pub async fn task(&self, task_id: TaskId) -> Task {
        self.tasks.find_by_id(task_id).await.unwrap().unwrap()
    }

    pub async fn wait_for_status(&self, task_id: TaskId, status: TaskStatus) -> Task {
        eventually(&format!("task {task_id} to become {status}"), || async move {
            self.task(task_id).await.status == status
        })
        .await;
        self.task(task_id).await
    }

    pub async fn wait_for_worker_exit(&self, task_id: TaskId) {
        eventually(&format!("worker of task {task_id} to exit"), || async move {
            !self.orchestrator.supervisor().is_running(task_id)
        })
        .await;
    }
}
