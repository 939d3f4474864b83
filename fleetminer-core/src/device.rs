//! 设备身份与计算设备聚合

use crate::algorithm::{
    AlgorithmDefinition, AlgorithmIds, AlgorithmKey, AlgorithmSetting, ModuleInfo,
};
use crate::capability::{
    DeviceMonitor, PowerLevel, UNSUPPORTED_FAN_SPEED, UNSUPPORTED_POWER_TARGET,
    UNSUPPORTED_POWER_USAGE, UNSUPPORTED_READING,
};
use crate::config::{DeviceConfig, PluginAlgorithmConfig};
use crate::error::CoreError;
use crate::reconcile;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// 设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Nvidia,
    Amd,
}

impl DeviceType {
    /// 设备UUID前缀中使用的类型编号
    pub fn type_code(&self) -> u8 {
        match self {
            DeviceType::Cpu => 1,
            DeviceType::Nvidia => 2,
            DeviceType::Amd => 3,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Nvidia => write!(f, "NVIDIA"),
            DeviceType::Amd => write!(f, "AMD"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "nvidia" => Ok(DeviceType::Nvidia),
            "amd" => Ok(DeviceType::Amd),
            _ => Err(CoreError::parse("设备类型", s)),
        }
    }
}

/// 设备枚举时创建的不可变硬件身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseDevice {
    id: u32,
    device_type: DeviceType,
    uuid: String,
    name: String,
}

impl BaseDevice {
    pub fn new<U: Into<String>, N: Into<String>>(
        id: u32,
        device_type: DeviceType,
        uuid: U,
        name: N,
    ) -> Self {
        Self {
            id,
            device_type,
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 设备运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Stopped,
    Mining,
    Benchmarking,
    Error,
    Pending,
    Disabled,
}

/// 计算设备
///
/// `Disabled` 状态只由 `set_enabled` 维护，与 `enabled == false` 始终一致。
pub struct ComputeDevice {
    base: BaseDevice,
    /// 用于进程控制的唯一序号
    index: u32,
    /// 分组显示用的短名称，例如 `CPU#1`
    name_count: String,
    enabled: bool,
    state: DeviceState,
    pub minimum_profit: f64,
    monitor: Option<Box<dyn DeviceMonitor>>,
    algorithm_settings: Vec<AlgorithmSetting>,
}

impl fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("base", &self.base)
            .field("index", &self.index)
            .field("name_count", &self.name_count)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("minimum_profit", &self.minimum_profit)
            .field("has_monitor", &self.monitor.is_some())
            .field("algorithm_settings", &self.algorithm_settings.len())
            .finish()
    }
}

impl ComputeDevice {
    pub fn new<S: Into<String>>(base: BaseDevice, index: u32, name_count: S) -> Self {
        Self {
            base,
            index,
            name_count: name_count.into(),
            enabled: true,
            state: DeviceState::Stopped,
            minimum_profit: 0.0,
            monitor: None,
            algorithm_settings: Vec::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: Box<dyn DeviceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn base(&self) -> &BaseDevice {
        &self.base
    }

    pub fn id(&self) -> u32 {
        self.base.id()
    }

    pub fn device_type(&self) -> DeviceType {
        self.base.device_type()
    }

    pub fn uuid(&self) -> &str {
        self.base.uuid()
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name_count(&self) -> &str {
        &self.name_count
    }

    /// 短名称加完整名称
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name_count, self.base.name())
    }

    /// 形如 `1-<base64>` 的网页端设备标识
    pub fn b64_uuid(&self) -> String {
        let encoded = match uuid::Uuid::parse_str(self.uuid()) {
            Ok(parsed) => URL_SAFE_NO_PAD.encode(parsed.as_bytes()),
            Err(_) => URL_SAFE_NO_PAD.encode(self.uuid().as_bytes()),
        };
        format!("{}-{}", self.device_type().type_code(), encoded)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_disabled(&self) -> bool {
        !self.enabled || self.state == DeviceState::Disabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.state = if enabled {
            DeviceState::Stopped
        } else {
            DeviceState::Disabled
        };
    }

    /// 更新运行状态，禁用设备或请求 `Disabled` 时返回 `false` 且不做修改
    pub fn set_state(&mut self, state: DeviceState) -> bool {
        if !self.enabled || state == DeviceState::Disabled {
            return false;
        }
        self.state = state;
        true
    }

    pub fn monitor(&self) -> Option<&dyn DeviceMonitor> {
        self.monitor.as_deref()
    }

    pub fn power_target(&self) -> u32 {
        self.monitor()
            .and_then(|m| m.as_power_target())
            .map(|c| c.power_target())
            .unwrap_or(UNSUPPORTED_POWER_TARGET)
    }

    pub fn power_level(&self) -> PowerLevel {
        self.monitor()
            .and_then(|m| m.as_power_level())
            .map(|c| c.power_level())
            .unwrap_or(PowerLevel::Unsupported)
    }

    pub fn load(&self) -> f32 {
        self.monitor()
            .and_then(|m| m.as_load())
            .map(|c| c.load())
            .unwrap_or(UNSUPPORTED_READING)
    }

    pub fn temperature(&self) -> f32 {
        self.monitor()
            .and_then(|m| m.as_temperature())
            .map(|c| c.temperature())
            .unwrap_or(UNSUPPORTED_READING)
    }

    pub fn fan_speed(&self) -> i32 {
        self.monitor()
            .and_then(|m| m.as_fan_speed())
            .map(|c| c.fan_speed())
            .unwrap_or(UNSUPPORTED_FAN_SPEED)
    }

    pub fn power_usage(&self) -> f64 {
        self.monitor()
            .and_then(|m| m.as_power_usage())
            .map(|c| c.power_usage())
            .unwrap_or(UNSUPPORTED_POWER_USAGE)
    }

    pub fn algorithm_settings(&self) -> &[AlgorithmSetting] {
        &self.algorithm_settings
    }

    pub fn get_algorithm(&self, module_id: &str, ids: &AlgorithmIds) -> Option<&AlgorithmSetting> {
        self.algorithm_settings
            .iter()
            .find(|a| a.module.id == module_id && &a.ids == ids)
    }

    pub fn get_algorithm_mut(&mut self, key: &AlgorithmKey) -> Option<&mut AlgorithmSetting> {
        self.algorithm_settings.iter_mut().find(|a| a.matches(key))
    }

    /// 模块注册或升级时合并其算法列表
    pub fn update_plugin_algorithms(&mut self, module: &ModuleInfo, algorithms: &[AlgorithmDefinition]) {
        let existing = std::mem::take(&mut self.algorithm_settings);
        self.algorithm_settings = reconcile::reconcile(existing, algorithms, module);
        debug!(
            "设备 {} 合并模块 {} 的算法列表，当前共 {} 个算法设置",
            self.uuid(),
            module.id,
            self.algorithm_settings.len()
        );
    }

    /// 模块卸载时删除其全部算法设置
    pub fn remove_plugin_algorithms(&mut self, module_id: &str) {
        let existing = std::mem::take(&mut self.algorithm_settings);
        self.algorithm_settings = reconcile::remove_module(existing, module_id);
    }

    /// 从另一台设备复制共有算法的基准数据
    pub fn copy_benchmark_settings_from(&mut self, other: &ComputeDevice) {
        for source in &other.algorithm_settings {
            if let Some(target) = self.get_algorithm_mut(&source.key()) {
                target.speeds = source.speeds.clone();
                target.extra_launch_parameters = source.extra_launch_parameters.clone();
                target.power_usage = source.power_usage;
            }
        }
    }

    /// 应用持久化配置，UUID不匹配时不做任何修改
    pub fn set_device_config(&mut self, config: &DeviceConfig) {
        if config.device_uuid != self.uuid() {
            debug!(
                "配置UUID {} 与设备 {} 不匹配，忽略",
                config.device_uuid,
                self.uuid()
            );
            return;
        }

        self.set_enabled(config.enabled);
        self.minimum_profit = config.minimum_profit;
        self.apply_power_config(config);

        for record in &config.plugin_algorithm_settings {
            let key = AlgorithmKey::new(record.plugin_uuid.clone(), record.algorithm_ids.clone());
            let Some(setting) = self.get_algorithm_mut(&key) else {
                continue;
            };
            setting.speeds = record.speeds.clone();
            setting.enabled = record.enabled;
            setting.extra_launch_parameters = record.extra_launch_parameters.clone();
            setting.power_usage = record.power_usage;
            setting.config_version = record.version();
        }
    }

    fn apply_power_config(&self, config: &DeviceConfig) {
        let Some(monitor) = self.monitor() else {
            return;
        };

        if config.power_level.is_tiered() {
            if let Some(setter) = monitor.as_set_power_level() {
                if let Err(e) = setter.set_power_level(config.power_level) {
                    warn!("设备 {} 设置功耗档位失败: {}", self.uuid(), e);
                }
            }
        } else if config.power_level == PowerLevel::Custom {
            if let Some(setter) = monitor.as_set_power_target_percentage() {
                if let Err(e) = setter.set_power_target_percentage(f64::from(config.power_target)) {
                    warn!("设备 {} 设置功耗目标失败: {}", self.uuid(), e);
                }
            }
        }
    }

    /// 生成持久化配置记录
    pub fn get_device_config(&self) -> DeviceConfig {
        DeviceConfig {
            device_name: self.name().to_string(),
            device_uuid: self.uuid().to_string(),
            enabled: self.enabled,
            minimum_profit: self.minimum_profit,
            power_level: self.power_level(),
            power_target: self.power_target(),
            plugin_algorithm_settings: self
                .algorithm_settings
                .iter()
                .map(PluginAlgorithmConfig::from_setting)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{AlgorithmType, PluginVersion};
    use crate::capability::{PowerLevelReadout, SetPowerLevel, SetPowerTargetPercentage};
    use crate::error::DeviceError;
    use std::sync::{Arc, Mutex};

    fn cpu_device() -> ComputeDevice {
        ComputeDevice::new(
            BaseDevice::new(0, DeviceType::Cpu, "CPU-8f2a", "Intel(R) Core(TM) i7-8700K"),
            0,
            "CPU#1",
        )
    }

    fn module() -> ModuleInfo {
        ModuleInfo::new("cpuminer", "cpuminer", PluginVersion::new(1, 0))
    }

    fn definitions() -> Vec<AlgorithmDefinition> {
        vec![
            AlgorithmDefinition::new(AlgorithmType::Lyra2REv2.into()),
            AlgorithmDefinition::new(AlgorithmType::Hodl.into()),
        ]
    }

    #[derive(Default)]
    struct RecordingMonitor {
        levels: Arc<Mutex<Vec<PowerLevel>>>,
        percentages: Arc<Mutex<Vec<f64>>>,
    }

    impl PowerLevelReadout for RecordingMonitor {
        fn power_level(&self) -> PowerLevel {
            self.levels.lock().unwrap().last().copied().unwrap_or(PowerLevel::High)
        }
    }

    impl SetPowerLevel for RecordingMonitor {
        fn set_power_level(&self, level: PowerLevel) -> Result<(), DeviceError> {
            self.levels.lock().unwrap().push(level);
            Ok(())
        }
    }

    impl SetPowerTargetPercentage for RecordingMonitor {
        fn set_power_target_percentage(&self, percentage: f64) -> Result<(), DeviceError> {
            self.percentages.lock().unwrap().push(percentage);
            Ok(())
        }
    }

    impl DeviceMonitor for RecordingMonitor {
        fn device_uuid(&self) -> &str {
            "CPU-8f2a"
        }

        fn as_power_level(&self) -> Option<&dyn PowerLevelReadout> {
            Some(self)
        }

        fn as_set_power_level(&self) -> Option<&dyn SetPowerLevel> {
            Some(self)
        }

        fn as_set_power_target_percentage(&self) -> Option<&dyn SetPowerTargetPercentage> {
            Some(self)
        }
    }

    #[test]
    fn test_disabled_state_follows_enabled_flag() {
        let mut device = cpu_device();
        assert!(!device.is_disabled());
        assert_eq!(device.state(), DeviceState::Stopped);

        device.set_enabled(false);
        assert!(device.is_disabled());
        assert_eq!(device.state(), DeviceState::Disabled);

        // 禁用设备不能被切换到其他运行状态
        assert!(!device.set_state(DeviceState::Mining));
        assert_eq!(device.state(), DeviceState::Disabled);

        device.set_enabled(true);
        assert!(device.set_state(DeviceState::Mining));
        assert!(!device.set_state(DeviceState::Disabled));
        assert!(!device.is_disabled());
    }

    #[test]
    fn test_readouts_without_monitor_use_sentinels() {
        let device = cpu_device();
        assert_eq!(device.load(), -1.0);
        assert_eq!(device.temperature(), -1.0);
        assert_eq!(device.fan_speed(), -1);
        assert_eq!(device.power_usage(), -1.0);
        assert_eq!(device.power_target(), 0);
        assert_eq!(device.power_level(), PowerLevel::Unsupported);
    }

    #[test]
    fn test_names() {
        let device = cpu_device();
        assert_eq!(device.full_name(), "CPU#1 Intel(R) Core(TM) i7-8700K");
        assert!(device.b64_uuid().starts_with("1-"));

        let gpu = ComputeDevice::new(
            BaseDevice::new(1, DeviceType::Nvidia, "67e55044-10b1-426f-9247-bb680e5fe0c8", "RTX"),
            1,
            "GPU#1",
        );
        assert_eq!(gpu.b64_uuid(), "2-Z-VQRBCxQm-SR7toDl_gyA");
    }

    #[test]
    fn test_set_device_config_ignores_other_uuid() {
        let mut device = cpu_device();
        let mut config = DeviceConfig::new("other", "GPU-9999");
        config.enabled = false;
        config.minimum_profit = 3.0;

        device.set_device_config(&config);
        assert!(device.is_enabled());
        assert_eq!(device.minimum_profit, 0.0);
    }

    #[test]
    fn test_set_device_config_applies_algorithm_records() {
        let mut device = cpu_device();
        device.update_plugin_algorithms(&module(), &definitions());

        let mut config = DeviceConfig::new("cpu", "CPU-8f2a");
        config.minimum_profit = 0.25;
        config.plugin_algorithm_settings.push(PluginAlgorithmConfig {
            name: "cpuminer".to_string(),
            plugin_uuid: "cpuminer".to_string(),
            algorithm_ids: AlgorithmType::Hodl.into(),
            enabled: false,
            extra_launch_parameters: "--cpu-priority 1".to_string(),
            plugin_version: "0.9".to_string(),
            power_usage: 65.0,
            speeds: vec![250.0],
        });
        // 设备上不存在的算法记录被忽略
        config.plugin_algorithm_settings.push(PluginAlgorithmConfig {
            name: "other".to_string(),
            plugin_uuid: "other".to_string(),
            algorithm_ids: AlgorithmType::Keccak.into(),
            enabled: true,
            extra_launch_parameters: String::new(),
            plugin_version: "1.0".to_string(),
            power_usage: 0.0,
            speeds: vec![1.0],
        });

        device.set_device_config(&config);
        assert_eq!(device.minimum_profit, 0.25);
        assert_eq!(device.algorithm_settings().len(), 2);

        let hodl = device
            .get_algorithm("cpuminer", &AlgorithmType::Hodl.into())
            .unwrap();
        assert!(!hodl.enabled);
        assert_eq!(hodl.benchmark_speed(), 250.0);
        assert_eq!(hodl.extra_launch_parameters, "--cpu-priority 1");
        assert_eq!(hodl.power_usage, 65.0);
        assert_eq!(hodl.config_version, PluginVersion::new(0, 9));

        // 保存时写回读入的结构版本，而不是模块当前版本
        let saved = device.get_device_config();
        let record = saved
            .plugin_algorithm_settings
            .iter()
            .find(|r| r.algorithm_ids == AlgorithmIds::single(AlgorithmType::Hodl))
            .unwrap();
        assert_eq!(record.plugin_version, "0.9");
    }

    #[test]
    fn test_power_config_uses_capabilities() {
        let monitor = RecordingMonitor::default();
        let levels = monitor.levels.clone();
        let percentages = monitor.percentages.clone();
        let mut device = cpu_device().with_monitor(Box::new(monitor));

        let mut config = DeviceConfig::new("cpu", "CPU-8f2a");
        config.power_level = PowerLevel::Low;
        device.set_device_config(&config);
        assert_eq!(*levels.lock().unwrap(), vec![PowerLevel::Low]);
        assert_eq!(device.power_level(), PowerLevel::Low);

        config.power_level = PowerLevel::Custom;
        config.power_target = 80;
        device.set_device_config(&config);
        assert_eq!(*percentages.lock().unwrap(), vec![80.0]);
        assert_eq!(levels.lock().unwrap().len(), 1);
    }

    /// 拒绝所有功耗设置的监控实现
    struct ReadOnlyMonitor;

    impl SetPowerLevel for ReadOnlyMonitor {
        fn set_power_level(&self, _level: PowerLevel) -> Result<(), DeviceError> {
            Err(DeviceError::unsupported_operation("set_power_level"))
        }
    }

    impl SetPowerTargetPercentage for ReadOnlyMonitor {
        fn set_power_target_percentage(&self, percentage: f64) -> Result<(), DeviceError> {
            Err(DeviceError::invalid_configuration(format!(
                "power target {}% out of range",
                percentage
            )))
        }
    }

    impl DeviceMonitor for ReadOnlyMonitor {
        fn device_uuid(&self) -> &str {
            "CPU-8f2a"
        }

        fn as_set_power_level(&self) -> Option<&dyn SetPowerLevel> {
            Some(self)
        }

        fn as_set_power_target_percentage(&self) -> Option<&dyn SetPowerTargetPercentage> {
            Some(self)
        }
    }

    #[test]
    fn test_power_setter_failure_does_not_abort_config() {
        let mut device = cpu_device().with_monitor(Box::new(ReadOnlyMonitor));
        device.update_plugin_algorithms(&module(), &definitions());

        let mut config = DeviceConfig::new("cpu", "CPU-8f2a");
        config.enabled = false;
        config.minimum_profit = 1.5;
        config.power_level = PowerLevel::High;
        device.set_device_config(&config);

        config.power_level = PowerLevel::Custom;
        config.power_target = 250;
        device.set_device_config(&config);

        assert!(device.is_disabled());
        assert_eq!(device.minimum_profit, 1.5);
        // 没有读数能力时仍返回不支持的标记值
        assert_eq!(device.power_level(), PowerLevel::Unsupported);
    }

    #[test]
    fn test_get_device_config_round_trip() {
        let mut device = cpu_device();
        device.update_plugin_algorithms(&module(), &definitions());
        device
            .get_algorithm_mut(&AlgorithmKey::new("cpuminer", AlgorithmType::Lyra2REv2.into()))
            .unwrap()
            .set_benchmark_speed(1234.0);

        let config = device.get_device_config();
        assert_eq!(config.device_uuid, "CPU-8f2a");
        assert_eq!(config.plugin_algorithm_settings.len(), 2);

        let mut restored = cpu_device();
        restored.update_plugin_algorithms(&module(), &definitions());
        restored.set_device_config(&config);
        assert_eq!(
            restored
                .get_algorithm("cpuminer", &AlgorithmType::Lyra2REv2.into())
                .unwrap()
                .benchmark_speed(),
            1234.0
        );
    }

    #[test]
    fn test_copy_benchmark_settings() {
        let mut source = cpu_device();
        source.update_plugin_algorithms(&module(), &definitions());
        let key = AlgorithmKey::new("cpuminer", AlgorithmType::Lyra2REv2.into());
        {
            let setting = source.get_algorithm_mut(&key).unwrap();
            setting.set_benchmark_speed(900.0);
            setting.extra_launch_parameters = "--cpu-affinity 0x3".to_string();
            setting.power_usage = 40.0;
        }

        let mut target = ComputeDevice::new(
            BaseDevice::new(1, DeviceType::Cpu, "CPU-77aa", "Intel(R) Core(TM) i7-8700K"),
            1,
            "CPU#2",
        );
        target.update_plugin_algorithms(&module(), &definitions()[..1]);
        target.copy_benchmark_settings_from(&source);

        let copied = target.get_algorithm_mut(&key).unwrap();
        assert_eq!(copied.benchmark_speed(), 900.0);
        assert_eq!(copied.extra_launch_parameters, "--cpu-affinity 0x3");
        assert_eq!(copied.power_usage, 40.0);
        assert_eq!(target.algorithm_settings().len(), 1);
    }
}
