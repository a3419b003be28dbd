// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::repositories::task_repository::RepositoryError;
use std::fmt::Display;

/// 仓库实现模块
///
/// 提供领域仓库接口基于SeaORM的具体实现
pub mod reference_repo_impl;
pub mod schedule_repo_impl;
pub mod task_repo_impl;
pub mod task_result_repo_impl;

/// 将无法解析的存储值包装为仓库错误
pub(crate) fn corrupt<E: Display>(error: E) -> RepositoryError {
    RepositoryError::Corrupt(error.to_string())
}
