//! 日志系统

use crate::error::MiningError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: String,
    /// 日志文件路径
    pub file_path: Option<String>,
    /// 是否启用彩色输出
    pub colored: bool,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 多行美化输出，否则使用紧凑格式
    pub pretty: bool,
    pub rotation: LogRotation,
}

/// 日志轮转配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    #[default]
    Daily,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            colored: true,
            show_target: false,
            pretty: false,
            rotation: LogRotation::Daily,
        }
    }
}

fn level_filter(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// 初始化日志系统
///
/// 启用文件日志时返回写入线程的守卫，调用方必须持有到进程退出。
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, MiningError> {
    let env_filter = EnvFilter::from_default_env().add_directive(level_filter(&config.level).into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer = if config.pretty {
        fmt::layer()
            .with_ansi(config.colored)
            .with_target(config.show_target)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(config.colored)
            .with_target(config.show_target)
            .compact()
            .boxed()
    };

    let Some(file_path) = config.file_path else {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| MiningError::System(format!("Failed to init logging: {}", e)))?;
        return Ok(None);
    };

    let file_path = Path::new(&file_path);
    let directory = file_path.parent().unwrap_or(Path::new("."));
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("fleetminer.log");

    let (writer, guard) = match config.rotation {
        LogRotation::Never => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)
                .map_err(|e| MiningError::System(format!("Failed to open log file: {}", e)))?;
            non_blocking(file)
        }
        LogRotation::Hourly => non_blocking(rolling::hourly(directory, file_name)),
        LogRotation::Daily => non_blocking(rolling::daily(directory, file_name)),
    };

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .json();

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| MiningError::System(format!("Failed to init logging: {}", e)))?;

    Ok(Some(guard))
}

#[macro_export]
macro_rules! device_info {
    ($device_id:expr, $($arg:tt)*) => {
        tracing::info!(target: "device", device_id = $device_id, $($arg)*)
    };
}

#[macro_export]
macro_rules! device_warn {
    ($device_id:expr, $($arg:tt)*) => {
        tracing::warn!(target: "device", device_id = $device_id, $($arg)*)
    };
}

#[macro_export]
macro_rules! device_error {
    ($device_id:expr, $($arg:tt)*) => {
        tracing::error!(target: "device", device_id = $device_id, $($arg)*)
    };
}
