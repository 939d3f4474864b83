use crate::miner::MinerState;
use fleetminer_core::{CoreError, DeviceError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Detection error: {0}")]
    Detect(#[from] DetectError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Benchmark error: {0}")]
    Benchmark(#[from] BenchmarkError),

    #[error("Summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("System error: {0}")]
    System(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("Unsupported CPU: {device}, no supported instruction set extension")]
    UnsupportedCpu { device: String },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn miner: {path}, error: {error}")]
    SpawnFailed { path: PathBuf, error: String },

    #[error("Invalid state for {operation}: {state:?}")]
    InvalidState { operation: &'static str, state: MinerState },

    #[error("Failed to stop miner process {pid}: {error}")]
    StopFailed { pid: u32, error: String },

    #[error("Algorithm not found on device {device}: {algorithm}")]
    AlgorithmNotFound { device: String, algorithm: String },
}

#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("Benchmark timeout: {algorithm} after {seconds}s")]
    Timeout { algorithm: String, seconds: u64 },

    #[error("Benchmark produced no measurement: {algorithm}")]
    NoMeasurement { algorithm: String },

    #[error("Benchmark process failed: {algorithm}, error: {error}")]
    ProcessFailed { algorithm: String, error: String },

    #[error("Device disabled: {device}")]
    DeviceDisabled { device: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummaryError {
    #[error("Miner not running")]
    NotRunning,

    #[error("Miner warming up, telemetry not ready")]
    WarmingUp,

    #[error("Miner unavailable: {reason}")]
    Unavailable { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Connection failed: 127.0.0.1:{port}, error: {error}")]
    ConnectionFailed { port: u16, error: String },

    #[error("Telemetry timeout: 127.0.0.1:{port}")]
    Timeout { port: u16 },

    #[error("Invalid telemetry response: {reason}")]
    InvalidResponse { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {field}, reason: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Invalid value: {field}, value: {value}, reason: {reason}")]
    InvalidValue { field: String, value: String, reason: String },
}

impl BenchmarkError {
    /// 超时与无测量结果都不应覆盖已有的基准速度
    pub fn is_timeout(&self) -> bool {
        matches!(self, BenchmarkError::Timeout { .. })
    }
}

impl SummaryError {
    /// 调用方应当重启挖矿程序
    pub fn needs_restart(&self) -> bool {
        matches!(self, SummaryError::Unavailable { .. })
    }
}
