//! 设备集合管理
//!
//! 每台设备对应一个监督器，设备之间没有共享可变状态，基准测试按设备并发执行。

use crate::error::{BenchmarkError, SupervisorError};
use crate::miner::{
    BenchmarkConfig, MinerSettings, MinerSupervisor, PoolEndpoint, ProcessCounter, StartOutcome,
};
use fleetminer_core::{
    AlgorithmDefinition, AlgorithmIds, AlgorithmKey, ComputeDevice, DeviceConfig, ModuleInfo,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// 单个算法的基准测试结果
#[derive(Debug)]
pub struct BenchmarkReport {
    pub device_uuid: String,
    pub key: AlgorithmKey,
    pub result: Result<f64, BenchmarkError>,
}

#[derive(Default)]
pub struct DeviceFleet {
    supervisors: Vec<Arc<MinerSupervisor>>,
}

impl DeviceFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(
        &mut self,
        device: ComputeDevice,
        settings: MinerSettings,
        counter: Arc<dyn ProcessCounter>,
    ) -> Arc<MinerSupervisor> {
        info!("添加设备: {} ({})", device.full_name(), device.uuid());
        let supervisor = Arc::new(MinerSupervisor::new(device, settings, counter));
        self.supervisors.push(supervisor.clone());
        supervisor
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    pub fn supervisors(&self) -> &[Arc<MinerSupervisor>] {
        &self.supervisors
    }

    pub fn supervisor(&self, device_uuid: &str) -> Option<&Arc<MinerSupervisor>> {
        self.supervisors
            .iter()
            .find(|s| s.device_uuid() == device_uuid)
    }

    /// 模块注册或升级时合并到所有设备
    pub async fn register_module(&self, module: &ModuleInfo, algorithms: &[AlgorithmDefinition]) {
        for supervisor in &self.supervisors {
            supervisor
                .device()
                .write()
                .await
                .update_plugin_algorithms(module, algorithms);
        }
        info!("模块 {} v{} 已注册 {} 个算法", module.id, module.version, algorithms.len());
    }

    /// 模块卸载时从所有设备删除其算法
    pub async fn remove_module(&self, module_id: &str) {
        for supervisor in &self.supervisors {
            supervisor
                .device()
                .write()
                .await
                .remove_plugin_algorithms(module_id);
        }
        info!("模块 {} 已卸载", module_id);
    }

    /// 应用持久化配置，每条记录只作用于UUID匹配的设备
    pub async fn apply_configs(&self, configs: &[DeviceConfig]) {
        for supervisor in &self.supervisors {
            let mut device = supervisor.device().write().await;
            for config in configs {
                device.set_device_config(config);
            }
        }
    }

    pub async fn device_configs(&self) -> Vec<DeviceConfig> {
        let mut configs = Vec::with_capacity(self.supervisors.len());
        for supervisor in &self.supervisors {
            configs.push(supervisor.device().read().await.get_device_config());
        }
        configs
    }

    /// 在所有启用的设备上启动同一算法，返回每台设备的结果
    pub async fn start_all(
        &self,
        module_id: &str,
        ids: &AlgorithmIds,
        pool: &PoolEndpoint,
    ) -> Vec<(String, Result<StartOutcome, SupervisorError>)> {
        let key = AlgorithmKey::new(module_id, ids.clone());
        let starts = self.supervisors.iter().map(|supervisor| {
            let key = key.clone();
            async move {
                let outcome = supervisor.start(&key, pool).await;
                (supervisor.device_uuid().to_string(), outcome)
            }
        });
        join_all(starts).await
    }

    pub async fn stop_all(&self) {
        let stops = self.supervisors.iter().map(|supervisor| async move {
            if let Err(e) = supervisor.stop(false).await {
                warn!("设备 {} 停止失败: {}", supervisor.device_uuid(), e);
            }
        });
        join_all(stops).await;
    }

    /// 所有设备并发测试，同一设备上的算法依次测试
    ///
    /// `filter` 为空时测试设备上全部已启用的算法。
    pub async fn benchmark_all(
        &self,
        filter: Option<&AlgorithmIds>,
        config: &BenchmarkConfig,
        time_limit_secs: u64,
    ) -> Vec<BenchmarkReport> {
        let sessions = self.supervisors.iter().map(|supervisor| async move {
            let keys: Vec<AlgorithmKey> = {
                let device = supervisor.device().read().await;
                if device.is_disabled() {
                    return Vec::new();
                }
                device
                    .algorithm_settings()
                    .iter()
                    .filter(|s| s.enabled)
                    .filter(|s| filter.map(|ids| &s.ids == ids).unwrap_or(true))
                    .map(|s| s.key())
                    .collect()
            };

            let mut reports = Vec::with_capacity(keys.len());
            for key in keys {
                let result = supervisor.benchmark(&key, config, time_limit_secs).await;
                reports.push(BenchmarkReport {
                    device_uuid: supervisor.device_uuid().to_string(),
                    key,
                    result,
                });
            }
            reports
        });

        join_all(sessions).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{cpuminer_algorithms, cpuminer_module, CPUMINER_MODULE_ID};
    use crate::miner::{MinerBinaries, MinerBinary};
    use fleetminer_core::{AlgorithmType, BaseDevice, DeviceType};

    struct NoProcesses;

    impl ProcessCounter for NoProcesses {
        fn count(&self, _binary: &MinerBinary) -> usize {
            0
        }
    }

    fn fleet_with_two_cpus() -> DeviceFleet {
        let mut fleet = DeviceFleet::new();
        for (index, uuid) in ["CPU-a", "CPU-b"].into_iter().enumerate() {
            let device = ComputeDevice::new(
                BaseDevice::new(index as u32, DeviceType::Cpu, uuid, "Intel(R) Xeon(R) E5-2680"),
                index as u32,
                format!("CPU#{}", index + 1),
            );
            let settings = MinerSettings::new(MinerBinaries::from_paths("/nonexistent/a", "/nonexistent/b"));
            fleet.add_device(device, settings, Arc::new(NoProcesses));
        }
        fleet
    }

    #[tokio::test]
    async fn test_register_and_remove_module() {
        let fleet = fleet_with_two_cpus();
        fleet.register_module(&cpuminer_module(), &cpuminer_algorithms()).await;

        for supervisor in fleet.supervisors() {
            assert_eq!(supervisor.device().read().await.algorithm_settings().len(), 4);
        }

        fleet.remove_module(CPUMINER_MODULE_ID).await;
        for supervisor in fleet.supervisors() {
            assert!(supervisor.device().read().await.algorithm_settings().is_empty());
        }
    }

    #[tokio::test]
    async fn test_configs_apply_by_uuid() {
        let fleet = fleet_with_two_cpus();
        fleet.register_module(&cpuminer_module(), &cpuminer_algorithms()).await;

        let mut config = DeviceConfig::new("cpu", "CPU-b");
        config.enabled = false;
        fleet.apply_configs(&[config]).await;

        let configs = fleet.device_configs().await;
        assert_eq!(configs.len(), 2);
        assert!(configs[0].enabled);
        assert!(!configs[1].enabled);
        assert!(fleet.supervisor("CPU-b").is_some());
        assert!(fleet.supervisor("CPU-c").is_none());
    }

    #[tokio::test]
    async fn test_disabled_devices_are_skipped() {
        let fleet = fleet_with_two_cpus();
        fleet.register_module(&cpuminer_module(), &cpuminer_algorithms()).await;
        for supervisor in fleet.supervisors() {
            supervisor.device().write().await.set_enabled(false);
        }

        let reports = fleet.benchmark_all(None, &BenchmarkConfig::default(), 1).await;
        assert!(reports.is_empty());

        let pool = PoolEndpoint::new("stratum+tcp://pool.example.com:3333", "worker");
        let starts = fleet
            .start_all(CPUMINER_MODULE_ID, &AlgorithmType::Lyra2Z.into(), &pool)
            .await;
        assert!(starts
            .iter()
            .all(|(_, outcome)| matches!(outcome, Ok(StartOutcome::DeviceDisabled))));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_per_device() {
        let fleet = fleet_with_two_cpus();
        fleet.register_module(&cpuminer_module(), &cpuminer_algorithms()).await;

        let filter: AlgorithmIds = AlgorithmType::Lyra2REv2.into();
        let reports = fleet
            .benchmark_all(Some(&filter), &BenchmarkConfig::default(), 1)
            .await;

        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert_eq!(report.key.ids, filter);
            assert!(matches!(
                report.result,
                Err(BenchmarkError::Supervisor(SupervisorError::SpawnFailed { .. }))
            ));
        }
        // 启动失败不改变基准速度
        for supervisor in fleet.supervisors() {
            let device = supervisor.device().read().await;
            assert_eq!(
                device
                    .get_algorithm(CPUMINER_MODULE_ID, &filter)
                    .unwrap()
                    .benchmark_speed(),
                0.0
            );
        }
    }
}
