// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 进程间通信模块
///
/// 消息定义与基于换行分隔 JSON 的编解码
pub mod codec;
pub mod message;
