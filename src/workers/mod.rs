// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作进程模块
///
/// 控制器一侧负责进程的启动、监控、崩溃恢复与停止；
/// 工作进程一侧负责执行抓取并通过IPC上报进度
pub mod crash;
pub mod events;
pub mod extractor;
pub mod handle;
pub mod launcher;
pub mod recovery;
pub mod runtime;
pub mod supervisor;

pub use events::{StopOutcome, SupervisorEvent};
pub use launcher::{ProcessLauncher, WorkerLauncher};
pub use recovery::RecoveryPolicy;
pub use supervisor::ProcessSupervisor;
