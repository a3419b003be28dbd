// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 基础设施层模块
///
/// 提供领域层抽象接口的技术实现：
/// - 数据库（database）：连接池与实体映射
/// - 指标（metrics）：Prometheus导出
/// - 仓库实现（repositories）：基于SeaORM的仓库
pub mod database;
pub mod metrics;
pub mod repositories;
