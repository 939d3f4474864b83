//! 设备枚举与内建算法模块

pub mod manager;

pub use manager::{BenchmarkReport, DeviceFleet};

use fleetminer_core::{
    AlgorithmDefinition, AlgorithmType, BaseDevice, ComputeDevice, DeviceType, ModuleInfo,
    PluginVersion,
};
use uuid::Uuid;

/// 内建 cpuminer 模块标识
pub const CPUMINER_MODULE_ID: &str = "cpuminer";

pub fn cpuminer_module() -> ModuleInfo {
    ModuleInfo::new(CPUMINER_MODULE_ID, "cpuminer-opt", PluginVersion::new(1, 0))
}

/// 内建 cpuminer 模块提供的算法
pub fn cpuminer_algorithms() -> Vec<AlgorithmDefinition> {
    vec![
        AlgorithmDefinition::new(AlgorithmType::Lyra2REv2.into()),
        AlgorithmDefinition::new(AlgorithmType::Lyra2Z.into()),
        AlgorithmDefinition::new(AlgorithmType::CryptoNightV7.into()),
        AlgorithmDefinition::new(AlgorithmType::Hodl.into()),
    ]
}

/// 由处理器型号和逻辑核心数生成稳定的设备UUID
pub fn cpu_uuid(brand: &str, logical_cores: usize) -> String {
    let seed = format!("{}-{}", brand, logical_cores);
    format!("CPU-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()))
}

/// 枚举主机CPU为一台计算设备
pub fn enumerate_cpu(brand: &str) -> ComputeDevice {
    let base = BaseDevice::new(
        0,
        DeviceType::Cpu,
        cpu_uuid(brand, num_cpus::get()),
        brand,
    );
    ComputeDevice::new(base, 0, "CPU#1")
}
