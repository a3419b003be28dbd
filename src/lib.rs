// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 任务编排器与调度管理服务
pub mod application;

/// 配置模块
///
/// 处理应用程序的配置设置和环境变量
pub mod config;

/// 领域模块
///
/// 包含核心业务实体和仓库接口
pub mod domain;

/// 基础设施模块
///
/// 提供数据库、仓库实现与指标导出
pub mod infrastructure;

/// 进程间通信模块
///
/// 控制器与工作进程之间的消息格式与编解码
pub mod ipc;

/// 调度模块
///
/// 周期与一次性触发、依赖条件和延迟
pub mod scheduler;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;

/// 工作进程模块
///
/// 进程监督器与工作进程运行时
pub mod workers;
