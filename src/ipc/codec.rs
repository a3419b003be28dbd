// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::ipc::message::Message;
use crate::utils::errors::IpcError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

/// 将消息编码为一行 JSON（包含结尾换行）
pub fn encode(message: &Message) -> Result<String, IpcError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// 解码一行 JSON
pub fn decode(line: &str) -> Result<Message, IpcError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// 按行读取消息帧
pub struct FrameReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// 读取下一帧
    ///
    /// 流结束返回 `Ok(None)`；无法解码的帧返回 `IpcError::Decode`，调用方可继续读取
    pub async fn next_frame(&mut self) -> Result<Option<Message>, IpcError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };

            if line.trim().is_empty() {
                continue;
            }

            return decode(&line).map(Some);
        }
    }
}

/// 按行写出消息帧
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// 写出一帧并立即刷新
    pub async fn send(&mut self, message: &Message) -> Result<(), IpcError> {
        let line = encode(message)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
