//! 单设备挖矿进程监督器
//!
//! `start`/`stop`/`benchmark` 通过同一把互斥锁串行执行，锁内持有进程句柄。
//! 状态快照单独保存，`get_summary` 只读取快照，不等待进行中的状态转换。
//! 基准测试期间测试进程同样保存在锁内，快照中可以看到它的PID和命令行。

use super::telemetry::{self, ApiData};
use super::{
    BinaryFamily, CommandLine, MinerBinary, MinerProcess, MinerSettings, MinerState, PoolEndpoint,
    ProcessCounter, StartOutcome,
};
use crate::error::{SummaryError, SupervisorError};
use crate::{device_error, device_info, device_warn};
use fleetminer_core::{AlgorithmKey, AlgorithmSetting, ComputeDevice, DeviceState};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// 对外可见的运行状态快照
#[derive(Debug, Clone)]
pub struct MinerStatus {
    pub state: MinerState,
    pub pid: Option<u32>,
    pub algorithm: Option<AlgorithmKey>,
    pub family: Option<BinaryFamily>,
    pub binary: Option<MinerBinary>,
    pub api_port: Option<u16>,
    pub command_line: Option<String>,
    pub started_at: Option<Instant>,
}

impl MinerStatus {
    fn stopped() -> Self {
        Self {
            state: MinerState::Stopped,
            pid: None,
            algorithm: None,
            family: None,
            binary: None,
            api_port: None,
            command_line: None,
            started_at: None,
        }
    }
}

pub(super) struct SupervisorInner {
    pub(super) state: MinerState,
    pub(super) process: Option<MinerProcess>,
    pub(super) algorithm: Option<AlgorithmKey>,
}

impl SupervisorInner {
    /// 把当前状态写入快照
    pub(super) fn write_status(&self, status: &mut MinerStatus) {
        status.state = self.state;
        status.algorithm = self.algorithm.clone();
        match &self.process {
            Some(process) => {
                status.pid = Some(process.pid());
                status.binary = Some(process.binary().clone());
                status.family = self
                    .algorithm
                    .as_ref()
                    .map(|key| BinaryFamily::of(key.ids.primary()));
                status.api_port = process.api_port();
                status.command_line = Some(process.command_line().to_string());
                status.started_at = Some(process.started_at());
            }
            None => {
                status.pid = None;
                status.binary = None;
                status.family = None;
                status.api_port = None;
                status.command_line = None;
                status.started_at = None;
            }
        }
    }
}

pub struct MinerSupervisor {
    pub(super) device: Arc<RwLock<ComputeDevice>>,
    pub(super) settings: MinerSettings,
    counter: Arc<dyn ProcessCounter>,
    pub(super) inner: Arc<Mutex<SupervisorInner>>,
    pub(super) status: Arc<RwLock<MinerStatus>>,
    device_uuid: String,
}

impl MinerSupervisor {
    pub fn new(device: ComputeDevice, settings: MinerSettings, counter: Arc<dyn ProcessCounter>) -> Self {
        let device_uuid = device.uuid().to_string();

        Self {
            device: Arc::new(RwLock::new(device)),
            settings,
            counter,
            inner: Arc::new(Mutex::new(SupervisorInner {
                state: MinerState::Stopped,
                process: None,
                algorithm: None,
            })),
            status: Arc::new(RwLock::new(MinerStatus::stopped())),
            device_uuid,
        }
    }

    pub fn device(&self) -> &Arc<RwLock<ComputeDevice>> {
        &self.device
    }

    pub fn settings(&self) -> &MinerSettings {
        &self.settings
    }

    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    pub async fn status(&self) -> MinerStatus {
        self.status.read().await.clone()
    }

    pub async fn state(&self) -> MinerState {
        self.status.read().await.state
    }

    /// 更新状态快照，须在持有 `inner` 锁时调用
    pub(super) async fn publish(&self, inner: &SupervisorInner) {
        inner.write_status(&mut *self.status.write().await);
    }

    pub(super) async fn set_device_state(&self, state: DeviceState) {
        self.device.write().await.set_state(state);
    }

    /// 读取设备上的算法设置，设备禁用时返回 `None`
    pub(super) async fn enabled_setting(
        &self,
        key: &AlgorithmKey,
    ) -> Result<Option<AlgorithmSetting>, SupervisorError> {
        let device = self.device.read().await;
        if device.is_disabled() {
            return Ok(None);
        }
        device
            .get_algorithm(&key.module_id, &key.ids)
            .cloned()
            .map(Some)
            .ok_or_else(|| SupervisorError::AlgorithmNotFound {
                device: device.uuid().to_string(),
                algorithm: key.ids.string_id(),
            })
    }

    /// 启动挖矿
    ///
    /// 已在运行时不做任何事；设备禁用时不启动进程。
    pub async fn start(
        &self,
        key: &AlgorithmKey,
        pool: &PoolEndpoint,
    ) -> Result<StartOutcome, SupervisorError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            MinerState::Stopped => {}
            MinerState::Running | MinerState::Starting => return Ok(StartOutcome::AlreadyRunning),
            state => {
                return Err(SupervisorError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        let Some(setting) = self.enabled_setting(key).await? else {
            device_warn!(self.device_uuid(), "设备已禁用，不启动挖矿");
            return Ok(StartOutcome::DeviceDisabled);
        };

        inner.state = MinerState::Starting;
        inner.algorithm = Some(key.clone());
        self.publish(&inner).await;

        let family = BinaryFamily::of(setting.algorithm_type());
        let binary = self.settings.binaries.get(family);
        let api_port = family.has_telemetry().then_some(self.settings.api_port);
        let command_line = CommandLine::mining(
            &setting,
            pool,
            self.settings.threads,
            api_port,
            &self.settings.device_extra_parameters,
        );

        match MinerProcess::spawn(binary, command_line, api_port, self.settings.affinity_mask, false) {
            Ok(process) => {
                let pid = process.pid();
                inner.process = Some(process);
                inner.state = MinerState::Running;
                self.publish(&inner).await;
                self.set_device_state(DeviceState::Mining).await;
                device_info!(self.device_uuid(), "开始挖矿 {} (PID: {})", key.ids, pid);
                Ok(StartOutcome::Started { pid })
            }
            Err(e) => {
                inner.state = MinerState::Stopped;
                inner.algorithm = None;
                self.publish(&inner).await;
                device_error!(self.device_uuid(), "启动挖矿程序失败: {}", e);
                Err(e)
            }
        }
    }

    /// 停止挖矿
    ///
    /// `will_restart` 表示即将切换算法，不产生停机提示。
    pub async fn stop(&self, will_restart: bool) -> Result<(), SupervisorError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            MinerState::Stopped => return Ok(()),
            MinerState::Running | MinerState::Starting | MinerState::Crashed => {}
            state => {
                return Err(SupervisorError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }

        inner.state = MinerState::Stopping;
        self.publish(&inner).await;

        let result = match inner.process.take() {
            Some(process) => process
                .terminate(self.settings.stop_timeout)
                .await
                .map(|status| debug!("挖矿进程退出状态: {}", status)),
            None => Ok(()),
        };

        inner.state = MinerState::Stopped;
        inner.algorithm = None;
        self.publish(&inner).await;
        self.set_device_state(DeviceState::Stopped).await;

        if will_restart {
            debug!("设备 {} 切换算法，挖矿程序已停止", self.device_uuid());
        } else {
            device_info!(self.device_uuid(), "挖矿已停止");
        }

        if let Err(e) = &result {
            device_error!(self.device_uuid(), "停止挖矿程序失败: {}", e);
        }
        result
    }

    /// 停止后以同一算法重新启动
    ///
    /// 停止失败只记录日志，仍然尝试启动。
    pub async fn restart(
        &self,
        key: &AlgorithmKey,
        pool: &PoolEndpoint,
    ) -> Result<StartOutcome, SupervisorError> {
        if let Err(e) = self.stop(true).await {
            device_warn!(self.device_uuid(), "重启前停止失败: {}", e);
        }
        self.start(key, pool).await
    }

    /// 检查进程是否仍在正常运行，发现异常时转入 `Crashed`
    ///
    /// 不会自动重启，由调用方决定后续处理。
    pub async fn check_health(&self) -> MinerState {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if inner.state != MinerState::Running {
            return inner.state;
        }

        let crashed = match inner.process.as_mut() {
            None => Some("process handle missing".to_string()),
            Some(process) => match process.try_exited() {
                Some(status) => Some(format!("process exited: {}", status)),
                None => {
                    let family = inner
                        .algorithm
                        .as_ref()
                        .map(|key| BinaryFamily::of(key.ids.primary()))
                        .unwrap_or(BinaryFamily::Primary);
                    let binary = process.binary().clone();
                    let api_port = process.api_port();
                    let uptime = process.started_at().elapsed();
                    self.probe_liveness(family, &binary, api_port, uptime).await.err()
                }
            },
        };

        if let Some(reason) = crashed {
            device_error!(self.device_uuid(), "挖矿程序异常: {}", reason);
            inner.state = MinerState::Crashed;
            self.publish(inner).await;
            self.set_device_state(DeviceState::Error).await;
        }
        inner.state
    }

    /// 在阻塞线程池中扫描进程表
    async fn count_alive(&self, binary: &MinerBinary) -> usize {
        let counter = self.counter.clone();
        let binary = binary.clone();
        match tokio::task::spawn_blocking(move || counter.count(&binary)).await {
            Ok(alive) => alive,
            Err(e) => {
                device_warn!(self.device_uuid(), "统计存活进程失败: {}", e);
                0
            }
        }
    }

    /// 预热期内遥测失败不视为异常
    async fn probe_liveness(
        &self,
        family: BinaryFamily,
        binary: &MinerBinary,
        api_port: Option<u16>,
        uptime: std::time::Duration,
    ) -> Result<(), String> {
        match (family, api_port) {
            (BinaryFamily::Legacy, _) | (_, None) => {
                let alive = self.count_alive(binary).await;
                if alive < self.settings.legacy_expected_processes {
                    return Err(format!(
                        "{} of {} expected processes alive",
                        alive, self.settings.legacy_expected_processes
                    ));
                }
                Ok(())
            }
            (BinaryFamily::Primary, Some(port)) => {
                if uptime < self.settings.warmup {
                    return Ok(());
                }
                telemetry::query_summary(port, self.settings.api_timeout)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        }
    }

    /// 查询当前运行数据
    ///
    /// 旧版程序没有遥测接口，按存活进程数判断，并使用最近一次基准速度。
    pub async fn get_summary(&self) -> Result<ApiData, SummaryError> {
        let status = self.status().await;
        if status.state != MinerState::Running {
            return Err(SummaryError::NotRunning);
        }
        let (Some(key), Some(binary), Some(family)) = (status.algorithm, status.binary, status.family)
        else {
            return Err(SummaryError::NotRunning);
        };

        match (family, status.api_port) {
            (BinaryFamily::Primary, Some(port)) => {
                match telemetry::query_summary(port, self.settings.api_timeout).await {
                    Ok(data) => Ok(data),
                    Err(e) => {
                        let warming_up = status
                            .started_at
                            .map(|t| t.elapsed() < self.settings.warmup)
                            .unwrap_or(false);
                        if warming_up {
                            debug!("设备 {} 遥测接口尚未就绪: {}", self.device_uuid(), e);
                            Err(SummaryError::WarmingUp)
                        } else {
                            Err(SummaryError::Unavailable {
                                reason: e.to_string(),
                            })
                        }
                    }
                }
            }
            _ => {
                let alive = self.count_alive(&binary).await;
                if alive < self.settings.legacy_expected_processes {
                    device_warn!(
                        self.device_uuid(),
                        "存活进程 {} 少于预期 {}，需要重启",
                        alive,
                        self.settings.legacy_expected_processes
                    );
                    return Err(SummaryError::Unavailable {
                        reason: format!(
                            "{} of {} expected processes alive",
                            alive, self.settings.legacy_expected_processes
                        ),
                    });
                }

                let device = self.device.read().await;
                let setting = device.get_algorithm(&key.module_id, &key.ids).ok_or_else(|| {
                    SummaryError::Unavailable {
                        reason: format!("algorithm {} no longer registered", key.ids),
                    }
                })?;
                Ok(ApiData::new(
                    setting.algorithm_type().clone(),
                    setting.miner_name.clone(),
                    setting.benchmark_speed(),
                ))
            }
        }
    }
}
