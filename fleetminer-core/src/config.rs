//! 设备配置记录
//!
//! 这些结构体是与外部持久化层之间的边界：持久化层负责文件读写，
//! 本库只负责把记录应用到设备上以及从设备生成记录。

use crate::algorithm::{AlgorithmIds, AlgorithmSetting, PluginVersion};
use crate::capability::PowerLevel;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 单个设备的持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_name: String,
    pub device_uuid: String,
    pub enabled: bool,
    #[serde(default)]
    pub minimum_profit: f64,
    #[serde(default)]
    pub power_level: PowerLevel,
    #[serde(default)]
    pub power_target: u32,
    #[serde(default)]
    pub plugin_algorithm_settings: Vec<PluginAlgorithmConfig>,
}

impl DeviceConfig {
    pub fn new<N: Into<String>, U: Into<String>>(device_name: N, device_uuid: U) -> Self {
        Self {
            device_name: device_name.into(),
            device_uuid: device_uuid.into(),
            enabled: true,
            minimum_profit: 0.0,
            power_level: PowerLevel::Unsupported,
            power_target: 0,
            plugin_algorithm_settings: Vec::new(),
        }
    }
}

/// 单个插件算法的持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginAlgorithmConfig {
    /// 插件名称
    pub name: String,
    pub plugin_uuid: String,
    /// 以 `-` 连接的算法标识组
    pub algorithm_ids: AlgorithmIds,
    pub enabled: bool,
    #[serde(default)]
    pub extra_launch_parameters: String,
    /// 保存时的插件版本（主版本.次版本），即设置的结构版本
    pub plugin_version: String,
    #[serde(default)]
    pub power_usage: f64,
    #[serde(default)]
    pub speeds: Vec<f64>,
}

impl PluginAlgorithmConfig {
    pub fn from_setting(setting: &AlgorithmSetting) -> Self {
        Self {
            name: setting.module.name.clone(),
            plugin_uuid: setting.module.id.clone(),
            algorithm_ids: setting.ids.clone(),
            enabled: setting.enabled,
            extra_launch_parameters: setting.extra_launch_parameters.clone(),
            plugin_version: setting.config_version.to_string(),
            power_usage: setting.power_usage,
            speeds: setting.speeds.clone(),
        }
    }

    /// 记录的配置版本，无法解析时视为 0.0
    pub fn version(&self) -> PluginVersion {
        match self.plugin_version.parse() {
            Ok(version) => version,
            Err(e) => {
                debug!("插件 {} 的配置版本无法解析: {}", self.plugin_uuid, e);
                PluginVersion::default()
            }
        }
    }
}
