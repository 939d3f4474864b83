//! FleetMiner-RS - 计算设备与外部挖矿进程编排
//!
//! 管理本机的一组计算设备（CPU、独立显卡），每台设备运行一个外部挖矿程序：
//! - 按CPU指令集选择挖矿程序变体
//! - 监督挖矿进程的启动、停止和异常
//! - 逐算法基准测试，得到设备的速度档案
//! - 模块升级时合并算法设置，保留用户的基准数据
//!
//! 设备模型、能力接口和算法设置位于 `fleetminer-core`。

pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod logging;
pub mod miner;
pub mod utils;

pub use config::Config;
pub use device::DeviceFleet;
pub use error::MiningError;
pub use miner::{MinerState, MinerSupervisor, StartOutcome};

/// 程序版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 程序名称
pub const NAME: &str = "fleetminer-rs";
