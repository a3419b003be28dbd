// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

/// 指数退避重试策略
///
/// 用于工作进程的首次启动重试以及工作进程内部的页面抓取重试
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次尝试）
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    pub initial_backoff: Duration,
    /// 退避上限
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
    /// 抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryPolicy {
    /// 工作进程启动策略：3次尝试，2s、4s 退避
    ///
    /// 退避只发生在两次尝试之间，最后一次失败后直接放弃；4次尝试时序列为 2s、4s、8s
    pub fn startup() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// 页面抓取策略：短退避并带抖动
    pub fn page_fetch() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// 计算第 `attempt` 次失败之后的等待时间
    ///
    /// `attempt` 从1开始，结果为 initial * multiplier^(attempt-1)，受上限约束
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let backoff_secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            let range = capped * self.jitter_factor;
            (capped + rand::random_range(-range..=range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// 第 `attempt` 次失败后是否还允许再试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// 第 `attempt` 次失败后的退避时间，没有剩余次数时返回 `None`
    pub fn next_backoff(&self, attempt: u32) -> Option<Duration> {
        self.should_retry(attempt)
            .then(|| self.calculate_backoff(attempt))
    }
}

/// 判断错误描述是否属于暂时性故障
pub fn is_transient_error(message: &str) -> bool {
    let message = message.to_lowercase();
    const TRANSIENT_PATTERNS: &[&str] = &[
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "connection closed",
        "broken pipe",
        "temporarily unavailable",
        "too many requests",
        "service unavailable",
        "bad gateway",
        "gateway timeout",
    ];

    TRANSIENT_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}
