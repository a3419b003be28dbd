// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理控制器的配置设置，包括数据库、进程监督、调度与指标
pub mod settings;
