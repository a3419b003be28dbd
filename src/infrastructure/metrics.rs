// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 初始化指标系统
///
/// 安装Prometheus导出器并注册各项指标的说明。地址无效或端口被占用时只记录警告。
///
/// # 参数
///
/// * `listen_addr` - 导出端点监听地址
pub fn init_metrics(listen_addr: &str) {
    let addr: SocketAddr = match listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address '{}': {}", listen_addr, e);
            return;
        }
    };

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    // Supervisor
    describe_gauge!("workers_active", "Number of tasks currently holding a worker handle");
    describe_counter!("worker_started_total", "Workers that passed startup confirmation");
    describe_counter!(
        "worker_start_failures_total",
        "Failed worker startup attempts, including retried ones"
    );
    describe_counter!("worker_crashes_total", "Unexpected worker exits and fatal stderr signatures");
    describe_counter!("worker_restarts_total", "Successful automatic restarts after a crash");
    describe_counter!(
        "worker_give_ups_total",
        "Tasks marked failed after exhausting the restart budget"
    );
    describe_counter!("worker_completed_total", "Workers that reported COMPLETED");
    describe_counter!("worker_failed_total", "Workers that reported a non-recoverable ERROR");
    describe_counter!("worker_stops_total", "Explicit stops, labelled by graceful or forced");

    // Orchestrator
    describe_counter!("tasks_created_total", "Tasks accepted by validation");
    describe_counter!("tasks_rejected_total", "Task creations rejected by validation");
    describe_counter!("task_results_stored_total", "Result records persisted from COMPLETED");

    // Scheduler
    describe_counter!("schedule_fired_total", "Schedules that started their task");
    describe_counter!("schedule_skipped_total", "Due schedules skipped by condition or busy task");
    describe_counter!("schedule_fire_failures_total", "Schedules whose task failed to start");
}
