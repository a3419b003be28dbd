// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use scrapeflow::utils::telemetry;
use scrapeflow::workers::runtime::WorkerRuntime;
use tracing::info;

/// 工作进程入口
///
/// stdin 接收控制器命令，stdout 只输出IPC帧，日志写入 stderr
#[tokio::main]
async fn main() {
    telemetry::init_worker_telemetry();
    info!(pid = std::process::id(), "Worker process started");

    let outcome = WorkerRuntime::http()
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await;

    info!(?outcome, exit_code = outcome.exit_code(), "Worker process exiting");
    std::process::exit(outcome.exit_code());
}
