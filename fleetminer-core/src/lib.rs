//! FleetMiner Core - 设备模型与算法设置
//!
//! 这个库定义了设备身份、设备监控能力特征、算法设置以及插件升级时的
//! 算法设置合并逻辑。它不涉及进程与操作系统，可以被任何上层调度器复用。

pub mod algorithm;
pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod reconcile;

// 重新导出常用类型
pub use algorithm::{
    AlgorithmDefinition, AlgorithmIds, AlgorithmKey, AlgorithmSetting, AlgorithmType, ModuleInfo,
    PluginVersion,
};
pub use capability::{DeviceMonitor, PowerLevel};
pub use config::{DeviceConfig, PluginAlgorithmConfig};
pub use device::{BaseDevice, ComputeDevice, DeviceState, DeviceType};
pub use error::{CoreError, DeviceError};
pub use reconcile::{reconcile, remove_module};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
