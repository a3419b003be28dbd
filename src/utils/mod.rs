// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// 时钟抽象、错误类型、退避策略与日志初始化
pub mod clock;
pub mod errors;
pub mod retry_policy;
pub mod telemetry;
