//! 基准测试会话
//!
//! 与挖矿使用相同的程序选择和CPU绑定，以 `--benchmark` 运行到时间限制，
//! 从输出中读取 `Total:` 或 `Benchmark:` 行的算力。

use super::supervisor::{MinerStatus, MinerSupervisor, SupervisorInner};
use super::{BinaryFamily, CommandLine, MinerProcess, MinerState};
use crate::error::{BenchmarkError, SupervisorError};
use crate::utils::{format_hashrate, parse_hashrate};
use crate::{device_info, device_warn};
use fleetminer_core::{AlgorithmKey, ComputeDevice, DeviceState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

const SPEED_MARKERS: [&str; 2] = ["Total:", "Benchmark:"];

/// 单次基准测试的覆盖参数
#[derive(Debug, Clone, Default)]
pub struct BenchmarkConfig {
    /// 替换设备级附加参数
    pub extra_launch_parameters: Option<String>,
    /// 替换线程数
    pub threads: Option<usize>,
}

/// 从挖矿程序输出行中解析算力（H/s）
pub fn parse_speed_line(line: &str) -> Option<f64> {
    SPEED_MARKERS.iter().find_map(|marker| {
        let start = line.find(marker)? + marker.len();
        let rest = line[start..].trim();
        let end = rest.find("/s").map(|i| i + 2).unwrap_or(rest.len());
        parse_hashrate(&rest[..end])
    })
}

async fn next_line<R: AsyncRead + Unpin>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

#[derive(Default)]
struct SessionResult {
    speed: Option<f64>,
    timed_out: bool,
    exit_failure: Option<String>,
}

/// 结束测试进程并把监督器恢复到 `Stopped`
#[derive(Clone)]
struct Release {
    status: Arc<RwLock<MinerStatus>>,
    device: Arc<RwLock<ComputeDevice>>,
    device_uuid: String,
    stop_timeout: Duration,
}

impl Release {
    async fn run(self, mut inner: OwnedMutexGuard<SupervisorInner>) {
        if let Some(process) = inner.process.take() {
            let pid = process.pid();
            match process.terminate(self.stop_timeout).await {
                Ok(status) => debug!("基准测试进程 {} 已回收: {}", pid, status),
                Err(e) => device_warn!(self.device_uuid.as_str(), "回收基准测试进程失败: {}", e),
            }
        }

        inner.state = MinerState::Stopped;
        inner.algorithm = None;
        inner.write_status(&mut *self.status.write().await);
        self.device.write().await.set_state(DeviceState::Stopped);
    }

    /// 没有运行时的情况下只能交给 `kill_on_drop`
    fn run_detached(self, mut inner: OwnedMutexGuard<SupervisorInner>) {
        inner.process = None;
        inner.state = MinerState::Stopped;
        inner.algorithm = None;
        if let Ok(mut status) = self.status.try_write() {
            inner.write_status(&mut status);
        }
        if let Ok(mut device) = self.device.try_write() {
            device.set_state(DeviceState::Stopped);
        }
    }
}

/// 进行中的基准测试
///
/// 持有状态锁直到测试进程被回收。调用方中途放弃时，`Drop` 在后台任务中
/// 完成回收，之后的 `start`/`stop`/`benchmark` 会等待回收结束。
struct BenchmarkSession {
    inner: Option<OwnedMutexGuard<SupervisorInner>>,
    release: Release,
}

impl BenchmarkSession {
    fn new(supervisor: &MinerSupervisor, inner: OwnedMutexGuard<SupervisorInner>) -> Self {
        Self {
            inner: Some(inner),
            release: Release {
                status: supervisor.status.clone(),
                device: supervisor.device.clone(),
                device_uuid: supervisor.device_uuid().to_string(),
                stop_timeout: supervisor.settings.stop_timeout,
            },
        }
    }

    async fn transition(&mut self, state: MinerState, update: impl FnOnce(&mut SupervisorInner)) {
        if let Some(inner) = self.inner.as_mut() {
            inner.state = state;
            update(&mut **inner);
            inner.write_status(&mut *self.release.status.write().await);
        }
    }

    fn process_mut(&mut self) -> Option<&mut MinerProcess> {
        self.inner.as_mut()?.process.as_mut()
    }

    fn spawn_release(&mut self) -> Option<JoinHandle<()>> {
        let inner = self.inner.take()?;
        let release = self.release.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(release.run(inner))),
            Err(_) => {
                release.run_detached(inner);
                None
            }
        }
    }

    /// 回收测试进程，回收在独立任务中进行，不受调用方取消影响
    async fn finish(mut self) {
        if let Some(handle) = self.spawn_release() {
            if let Err(e) = handle.await {
                device_warn!(self.release.device_uuid.as_str(), "基准测试回收任务失败: {}", e);
            }
        }
    }
}

impl Drop for BenchmarkSession {
    fn drop(&mut self) {
        if self.inner.is_some() {
            device_warn!(self.release.device_uuid.as_str(), "基准测试被取消，结束测试进程");
            let _ = self.spawn_release();
        }
    }
}

impl MinerSupervisor {
    /// 对一个算法运行基准测试，成功时写回设备上的基准速度
    ///
    /// 超时会强制结束进程并返回 `Timeout`，原有速度保持不变。
    /// 返回的 future 被丢弃时测试进程同样会被结束并回收。
    pub async fn benchmark(
        &self,
        key: &AlgorithmKey,
        config: &BenchmarkConfig,
        time_limit_secs: u64,
    ) -> Result<f64, BenchmarkError> {
        let inner = self.inner.clone().lock_owned().await;
        if inner.state != MinerState::Stopped {
            return Err(SupervisorError::InvalidState {
                operation: "benchmark",
                state: inner.state,
            }
            .into());
        }

        let Some(setting) = self.enabled_setting(key).await? else {
            return Err(BenchmarkError::DeviceDisabled {
                device: self.device_uuid().to_string(),
            });
        };

        let algorithm = key.ids.string_id();
        let family = BinaryFamily::of(setting.algorithm_type());
        let binary = self.settings.binaries.get(family).clone();
        // 旧版程序不支持 --time-limit，仅由外部截止时间结束
        let time_limit = family.has_telemetry().then_some(time_limit_secs);
        let deadline = if family.has_telemetry() {
            Duration::from_secs(time_limit_secs) + self.settings.benchmark_grace
        } else {
            Duration::from_secs(time_limit_secs)
        };

        let command_line = CommandLine::benchmark(
            &setting,
            config.threads.unwrap_or(self.settings.threads),
            time_limit,
            config
                .extra_launch_parameters
                .as_deref()
                .unwrap_or(&self.settings.device_extra_parameters),
        );

        let mut session = BenchmarkSession::new(self, inner);
        session
            .transition(MinerState::Starting, |inner| inner.algorithm = Some(key.clone()))
            .await;

        let process = match MinerProcess::spawn(
            &binary,
            command_line,
            None,
            self.settings.affinity_mask,
            true,
        ) {
            Ok(process) => process,
            Err(e) => {
                session.finish().await;
                return Err(e.into());
            }
        };

        session
            .transition(MinerState::Benchmarking, |inner| inner.process = Some(process))
            .await;
        self.set_device_state(DeviceState::Benchmarking).await;

        let result = match session.process_mut() {
            Some(process) => read_output(process, deadline).await,
            None => SessionResult::default(),
        };
        session.finish().await;

        let outcome = match (family, result) {
            (_, SessionResult { speed: Some(speed), timed_out: false, .. }) => Ok(speed),
            (BinaryFamily::Legacy, SessionResult { speed: Some(speed), .. }) => Ok(speed),
            (_, SessionResult { timed_out: true, .. }) => Err(BenchmarkError::Timeout {
                algorithm: algorithm.clone(),
                seconds: deadline.as_secs(),
            }),
            (_, SessionResult { exit_failure: Some(error), .. }) => {
                Err(BenchmarkError::ProcessFailed {
                    algorithm: algorithm.clone(),
                    error,
                })
            }
            _ => Err(BenchmarkError::NoMeasurement {
                algorithm: algorithm.clone(),
            }),
        };

        match outcome {
            Ok(speed) => {
                if let Some(target) = self.device.write().await.get_algorithm_mut(key) {
                    target.set_benchmark_speed(speed);
                }
                device_info!(
                    self.device_uuid(),
                    "基准测试完成 {}: {}",
                    algorithm,
                    format_hashrate(speed)
                );
                Ok(speed)
            }
            Err(e) => {
                device_warn!(self.device_uuid(), "基准测试失败 {}: {}", algorithm, e);
                Err(e)
            }
        }
    }
}

/// 读取输出直到进程退出或截止时间
async fn read_output(process: &mut MinerProcess, deadline: Duration) -> SessionResult {
    let mut stdout = process.take_stdout().map(|s| BufReader::new(s).lines());
    let mut stderr = process.take_stderr().map(|s| BufReader::new(s).lines());
    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();

    let deadline_at = Instant::now() + deadline;
    let sleep = tokio::time::sleep_until(deadline_at);
    tokio::pin!(sleep);

    let mut speed = None;
    let mut timed_out = false;
    let mut record = |line: &str| {
        trace!("基准测试输出: {}", line);
        if let Some(parsed) = parse_speed_line(line) {
            speed = Some(parsed);
        }
    };

    while stdout_open || stderr_open {
        tokio::select! {
            _ = &mut sleep => {
                timed_out = true;
                break;
            }
            line = next_line(&mut stdout), if stdout_open => match line {
                Some(line) => record(&line),
                None => stdout_open = false,
            },
            line = next_line(&mut stderr), if stderr_open => match line {
                Some(line) => record(&line),
                None => stderr_open = false,
            },
        }
    }

    let mut exit_failure = None;
    if !timed_out {
        match tokio::time::timeout_at(deadline_at, process.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                exit_failure = Some(format!("exit status: {}", status));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => exit_failure = Some(e.to_string()),
            Err(_) => timed_out = true,
        }
    }

    SessionResult {
        speed,
        timed_out,
        exit_failure,
    }
}
