//! 外部挖矿进程管理
//!
//! 包括程序变体选择、命令行构建、进程生命周期、遥测查询和基准测试。

pub mod benchmark;
pub mod binary;
pub mod command;
pub mod liveness;
pub mod process;
pub mod supervisor;
pub mod telemetry;

pub use benchmark::{parse_speed_line, BenchmarkConfig};
pub use binary::{BinaryFamily, MinerBinaries, MinerBinary};
pub use command::CommandLine;
pub use liveness::{ProcessCounter, SystemProcessCounter};
pub use process::MinerProcess;
pub use supervisor::{MinerStatus, MinerSupervisor};
pub use telemetry::ApiData;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 挖矿进程状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MinerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    Benchmarking,
}

/// 启动请求的结果，均不是错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning,
    DeviceDisabled,
}

/// 矿池地址与用户名，密码由算法族决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEndpoint {
    pub url: String,
    pub username: String,
}

impl PoolEndpoint {
    pub fn new<U: Into<String>, N: Into<String>>(url: U, username: N) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
        }
    }
}

/// 单个设备监督器的运行参数
#[derive(Debug, Clone)]
pub struct MinerSettings {
    pub binaries: MinerBinaries,
    pub threads: usize,
    /// 0 表示不绑定
    pub affinity_mask: u64,
    pub api_port: u16,
    pub device_extra_parameters: String,
    /// 启动后遥测接口无响应时仍视为预热中的时长
    pub warmup: Duration,
    pub api_timeout: Duration,
    pub stop_timeout: Duration,
    /// 遥测程序基准测试在时间限制之外额外等待的时长
    pub benchmark_grace: Duration,
    pub legacy_expected_processes: usize,
}

impl MinerSettings {
    pub fn new(binaries: MinerBinaries) -> Self {
        Self {
            binaries,
            threads: num_cpus::get_physical(),
            affinity_mask: 0,
            api_port: 4048,
            device_extra_parameters: String::new(),
            warmup: Duration::from_secs(30),
            api_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(5),
            benchmark_grace: Duration::from_secs(10),
            legacy_expected_processes: num_cpus::get_physical(),
        }
    }
}
