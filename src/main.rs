// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use migration::{Migrator, MigratorTrait};
use scrapeflow::application::TaskOrchestrator;
use scrapeflow::config::settings::Settings;
use scrapeflow::infrastructure::database::connection;
use scrapeflow::infrastructure::metrics;
use scrapeflow::infrastructure::repositories::reference_repo_impl::ReferenceRepositoryImpl;
use scrapeflow::infrastructure::repositories::schedule_repo_impl::ScheduleRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use scrapeflow::infrastructure::repositories::task_result_repo_impl::TaskResultRepositoryImpl;
use scrapeflow::scheduler::Scheduler;
use scrapeflow::utils::telemetry;
use scrapeflow::workers::{ProcessLauncher, ProcessSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// 主函数
///
/// 控制器入口，初始化所有组件并在收到 ctrl-c 后停止全部工作进程
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting scrapeflow controller...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    if settings.metrics.enabled {
        metrics::init_metrics(&settings.metrics.listen_addr);
    }

    // 3. Connect to database
    let db = Arc::new(connection::create_pool(&settings.database).await?);
    info!("Database connection established");

    info!("Running database migrations...");
    Migrator::up(db.as_ref(), None).await?;
    info!("Database migrations applied");

    // 4. Initialize supervisor
    let program = settings.supervisor.worker_program();
    info!(program = %program.display(), "Using worker executable");
    let launcher = Arc::new(ProcessLauncher::new(program));
    let (supervisor, events) =
        ProcessSupervisor::new(launcher, settings.supervisor.recovery_policy());

    // 5. Initialize orchestrator
    let task_repo = Arc::new(TaskRepositoryImpl::new(db.clone()));
    let result_repo = Arc::new(TaskResultRepositoryImpl::new(db.clone()));
    let reference_repo = Arc::new(ReferenceRepositoryImpl::new(db.clone()));
    let schedule_repo = Arc::new(ScheduleRepositoryImpl::new(db.clone()));

    let orchestrator = Arc::new(TaskOrchestrator::new(
        task_repo,
        result_repo,
        reference_repo,
        supervisor.clone(),
    ));

    let recovered = orchestrator.recover_orphans().await?;
    if recovered > 0 {
        warn!(recovered, "Reset tasks left running by a previous controller");
    }

    let (events_shutdown_tx, events_shutdown_rx) = watch::channel(false);
    let event_loop = orchestrator.spawn_event_loop(events, events_shutdown_rx);

    // 6. Start scheduler
    let scheduler_handle = if settings.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(
            schedule_repo,
            orchestrator.clone(),
            settings.scheduler.scheduler_config(),
        ));
        let (tx, rx) = watch::channel(false);
        Some((tx, scheduler.spawn(rx)))
    } else {
        info!("Scheduler disabled");
        None
    };

    info!("Controller ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // 7. Stop scheduler, workers, then the event loop
    if let Some((tx, handle)) = scheduler_handle {
        let _ = tx.send(true);
        let _ = handle.await;
    }

    for (task_id, outcome) in supervisor.shutdown().await {
        info!(task_id, %outcome, "Worker stopped");
    }
    // Let the event lanes persist the final stop events.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let _ = events_shutdown_tx.send(true);
    let _ = event_loop.await;

    info!("Controller stopped");
    Ok(())
}
