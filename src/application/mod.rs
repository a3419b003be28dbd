// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 任务编排器是外部调用方唯一的入口，调度管理服务维护调度定义
pub mod dto;
pub mod orchestrator;
pub mod schedule_service;

pub use orchestrator::{TaskOrchestrator, TaskStatusReport};
pub use schedule_service::ScheduleService;
