// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 调度模块
///
/// 按cron表达式或一次性时间触发任务，并处理依赖条件与延迟
pub mod runner;
pub mod trigger;

pub use runner::{ScheduleTarget, Scheduler, SchedulerConfig, TickReport};
pub use trigger::CronExpression;
