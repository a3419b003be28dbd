// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod reference_repository;
pub mod schedule_repository;
pub mod task_repository;
pub mod task_result_repository;
