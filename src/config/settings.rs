// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::scheduler::runner::SchedulerConfig;
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::recovery::RecoveryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const WORKER_BINARY: &str = "scrape-worker";

/// 应用程序配置设置
///
/// 包含数据库、进程监督、调度器和指标导出等配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 进程监督配置
    pub supervisor: SupervisorSettings,
    /// 调度器配置
    pub scheduler: SchedulerSettings,
    /// 指标导出配置
    pub metrics: MetricsSettings,
}

/// 数据库配置设置
#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// 进程监督配置设置
#[derive(Debug, Deserialize)]
pub struct SupervisorSettings {
    /// 工作进程可执行文件，缺省时使用与控制器同目录的 `scrape-worker`
    pub worker_program: Option<String>,
    /// 运行期崩溃后最多重启次数
    pub max_restart_attempts: u32,
    /// 崩溃后到重启之间的等待（秒）
    pub restart_delay_secs: u64,
    /// 首次启动最多尝试次数
    pub startup_attempts: u32,
    /// 首次启动失败后的初始退避（秒）
    pub startup_backoff_secs: u64,
    /// 启动退避的倍数
    pub startup_backoff_multiplier: f64,
    /// 等待启动确认的窗口（秒）
    pub startup_timeout_secs: u64,
    /// STOP 之后的宽限期（秒）
    pub stop_grace_secs: u64,
    /// 强制终止后等待退出的时间（秒）
    pub kill_timeout_secs: u64,
    /// 稳定运行多久后清零重启计数（秒）
    pub stable_after_secs: u64,
}

/// 调度器配置设置
#[derive(Debug, Deserialize)]
pub struct SchedulerSettings {
    /// 是否启用调度器
    pub enabled: bool,
    /// 评估间隔（秒）
    pub tick_interval_secs: u64,
}

/// 指标导出配置设置
#[derive(Debug, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用Prometheus导出
    pub enabled: bool,
    /// 导出端点监听地址
    pub listen_addr: String,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次叠加默认值、`config/default`、`config/{APP_ENVIRONMENT}` 与 `SCRAPEFLOW__` 前缀的环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        Self::load_from(Path::new("config"), &env)
    }

    /// 从指定目录加载配置
    ///
    /// # 参数
    ///
    /// * `dir` - 配置文件目录
    /// * `env` - 环境名，对应 `{dir}/{env}` 文件
    pub fn load_from(dir: &Path, env: &str) -> Result<Self, ConfigError> {
        let default_file = dir.join("default");
        let env_file = dir.join(env);

        let builder = Config::builder()
            // Default DB settings
            .set_default("database.url", "sqlite://scrapeflow.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            // Default supervisor settings
            .set_default("supervisor.max_restart_attempts", 3)?
            .set_default("supervisor.restart_delay_secs", 5)?
            .set_default("supervisor.startup_attempts", 3)?
            .set_default("supervisor.startup_backoff_secs", 2)?
            .set_default("supervisor.startup_backoff_multiplier", 2.0)?
            .set_default("supervisor.startup_timeout_secs", 5)?
            .set_default("supervisor.stop_grace_secs", 10)?
            .set_default("supervisor.kill_timeout_secs", 5)?
            .set_default("supervisor.stable_after_secs", 60)?
            // Default scheduler settings
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.tick_interval_secs", 30)?
            // Default metrics settings
            .set_default("metrics.enabled", false)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")?
            .add_source(File::from(default_file).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(Environment::with_prefix("SCRAPEFLOW").separator("__"));

        builder.build()?.try_deserialize()
    }
}

impl SupervisorSettings {
    /// 转换为恢复策略
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_restart_attempts: self.max_restart_attempts,
            restart_delay: Duration::from_secs(self.restart_delay_secs),
            startup: RetryPolicy {
                max_attempts: self.startup_attempts.max(1),
                initial_backoff: Duration::from_secs(self.startup_backoff_secs),
                backoff_multiplier: self.startup_backoff_multiplier,
                ..RetryPolicy::startup()
            },
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            kill_timeout: Duration::from_secs(self.kill_timeout_secs),
            stable_after: Duration::from_secs(self.stable_after_secs),
        }
    }

    /// 工作进程可执行文件路径
    pub fn worker_program(&self) -> PathBuf {
        if let Some(program) = &self.worker_program {
            return PathBuf::from(program);
        }

        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY)))
            .unwrap_or_else(|| PathBuf::from(WORKER_BINARY))
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// 转换为调度器配置
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval(),
        }
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
