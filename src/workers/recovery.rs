// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::utils::retry_policy::RetryPolicy;
use std::time::Duration;

/// 工作进程恢复策略
///
/// 包含两套相互独立的规则：首次启动失败时的指数退避，以及运行期崩溃后的有限次重启
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    /// 运行期崩溃后最多重启次数
    pub max_restart_attempts: u32,
    /// 崩溃后到重启之间的固定等待
    pub restart_delay: Duration,
    /// 首次启动的重试策略
    pub startup: RetryPolicy,
    /// 等待启动确认的窗口
    pub startup_timeout: Duration,
    /// STOP 之后等待进程退出的宽限期
    pub stop_grace: Duration,
    /// 强制终止后等待进程退出的时间
    pub kill_timeout: Duration,
    /// 进程连续存活并上报进度达到该时长后，重启计数清零
    pub stable_after: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_restart_attempts: 3,
            restart_delay: Duration::from_secs(5),
            startup: RetryPolicy::startup(),
            startup_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(5),
            stable_after: Duration::from_secs(60),
        }
    }
}

/// 崩溃后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// 在 `delay` 之后进行第 `attempt` 次重启
    Restart { attempt: u32, delay: Duration },
    /// 已用尽重启次数
    GiveUp { attempts: u32 },
}

impl RecoveryPolicy {
    /// 根据已发生的连续重启次数决定下一步
    pub fn on_crash(&self, restarts_so_far: u32) -> RestartDecision {
        if restarts_so_far < self.max_restart_attempts {
            RestartDecision::Restart {
                attempt: restarts_so_far + 1,
                delay: self.restart_delay,
            }
        } else {
            RestartDecision::GiveUp {
                attempts: restarts_so_far,
            }
        }
    }

    /// 第 `attempt` 次启动失败后的退避，`None` 表示放弃启动
    pub fn startup_backoff(&self, attempt: u32) -> Option<Duration> {
        self.startup.next_backoff(attempt)
    }

    /// 启动最多尝试次数
    pub fn startup_attempts(&self) -> u32 {
        self.startup.max_attempts.max(1)
    }
}
