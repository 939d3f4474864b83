use crate::detect::ForceExtension;
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogRotation};
use crate::miner::{MinerBinaries, MinerSettings, PoolEndpoint};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetminer_core::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "fleetminer.toml")]
    pub config: String,

    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Log level, overrides the configuration file
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Detect the CPU instruction set extension and the selected miner binaries
    Detect,
    /// List devices and their algorithm settings
    Devices,
    /// Benchmark enabled algorithms on every enabled device
    Benchmark {
        /// Benchmark time limit in seconds
        #[arg(long, default_value_t = 30)]
        time_limit: u64,

        /// Only benchmark this algorithm id, e.g. "Lyra2REv2"
        #[arg(long)]
        algorithm: Option<String>,
    },
    /// Mine one algorithm until interrupted
    Mine {
        /// Algorithm id, e.g. "Lyra2REv2"
        algorithm: String,

        /// Health check interval in seconds
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub general: GeneralConfig,
    pub miner: MinerConfig,
    pub pool: PoolConfig,
    /// 持久化的设备配置，由设备列表回写
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub log_rotation: LogRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinerConfig {
    /// 挖矿程序所在目录
    pub binaries_dir: PathBuf,
    /// 指令集偏好，强制的指令集不受支持时会被改回 automatic
    #[serde(default)]
    pub force_extension: ForceExtension,
    /// 线程数，0 表示物理核心数
    #[serde(default)]
    pub threads: usize,
    /// CPU亲和性掩码，0 表示不绑定
    #[serde(default)]
    pub affinity_mask: u64,
    pub api_port: u16,
    /// 设备级附加启动参数，位于算法级参数之前
    #[serde(default)]
    pub extra_launch_parameters: String,
    pub api_warmup_secs: u64,
    pub api_timeout_ms: u64,
    pub stop_timeout_secs: u64,
    pub benchmark_grace_secs: u64,
    /// 无遥测接口的旧版挖矿程序应存活的进程数，0 表示物理核心数
    #[serde(default)]
    pub legacy_expected_processes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    pub url: String,
    pub username: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                log_level: "info".to_string(),
                log_file: None,
                log_rotation: LogRotation::Daily,
            },
            miner: MinerConfig {
                binaries_dir: PathBuf::from("bin"),
                force_extension: ForceExtension::Automatic,
                threads: 0,
                affinity_mask: 0,
                api_port: 4048,
                extra_launch_parameters: String::new(),
                api_warmup_secs: 30,
                api_timeout_ms: 2000,
                stop_timeout_secs: 5,
                benchmark_grace_secs: 10,
                legacy_expected_processes: 0,
            },
            pool: PoolConfig {
                url: "stratum+tcp://lyra2rev2.eu.nicehash.com:3347".to_string(),
                username: "worker".to_string(),
            },
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.pool.url).map_err(|e| ConfigError::InvalidValue {
            field: "pool.url".to_string(),
            value: self.pool.url.clone(),
            reason: e.to_string(),
        })?;
        if url.host_str().is_none() || url.port_or_known_default().is_none() {
            return Err(ConfigError::InvalidValue {
                field: "pool.url".to_string(),
                value: self.pool.url.clone(),
                reason: "must contain host and port".to_string(),
            });
        }

        if self.pool.username.trim().is_empty() {
            return Err(invalid("pool.username", "must not be empty"));
        }

        if self.miner.api_port < 1024 {
            return Err(ConfigError::InvalidValue {
                field: "miner.api_port".to_string(),
                value: self.miner.api_port.to_string(),
                reason: "out of range (1024-65535)".to_string(),
            });
        }

        if self.miner.stop_timeout_secs == 0 {
            return Err(invalid("miner.stop_timeout_secs", "must be greater than 0"));
        }

        if self.miner.api_timeout_ms == 0 {
            return Err(invalid("miner.api_timeout_ms", "must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.device_uuid.as_str()) {
                return Err(invalid(
                    "devices",
                    &format!("duplicate device config {}", device.device_uuid),
                ));
            }
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn log_config(&self, level_override: Option<&str>) -> LogConfig {
        LogConfig {
            level: level_override.unwrap_or(&self.general.log_level).to_string(),
            file_path: self
                .general
                .log_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            rotation: self.general.log_rotation,
            ..LogConfig::default()
        }
    }

    pub fn pool_endpoint(&self) -> PoolEndpoint {
        PoolEndpoint::new(self.pool.url.clone(), self.pool.username.clone())
    }

    /// 替换指定设备的持久化配置，不存在时追加
    pub fn upsert_device(&mut self, record: DeviceConfig) {
        match self
            .devices
            .iter_mut()
            .find(|d| d.device_uuid == record.device_uuid)
        {
            Some(existing) => *existing = record,
            None => self.devices.push(record),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl MinerConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get_physical()
        } else {
            self.threads
        }
    }

    pub fn expected_legacy_processes(&self) -> usize {
        if self.legacy_expected_processes == 0 {
            num_cpus::get_physical()
        } else {
            self.legacy_expected_processes
        }
    }

    /// 生成单个设备监督器使用的运行参数
    pub fn settings(&self, binaries: MinerBinaries) -> MinerSettings {
        MinerSettings {
            binaries,
            threads: self.effective_threads(),
            affinity_mask: self.affinity_mask,
            api_port: self.api_port,
            device_extra_parameters: self.extra_launch_parameters.clone(),
            warmup: Duration::from_secs(self.api_warmup_secs),
            api_timeout: Duration::from_millis(self.api_timeout_ms),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            benchmark_grace: Duration::from_secs(self.benchmark_grace_secs),
            legacy_expected_processes: self.expected_legacy_processes(),
        }
    }
}
