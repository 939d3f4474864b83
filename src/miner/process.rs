//! 挖矿进程句柄
//!
//! 子进程以 `kill_on_drop` 启动，句柄在任何路径上被丢弃时进程都会被结束。

use super::{CommandLine, MinerBinary};
use crate::error::SupervisorError;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

pub struct MinerProcess {
    child: Child,
    pid: u32,
    binary: MinerBinary,
    command_line: CommandLine,
    api_port: Option<u16>,
    started_at: Instant,
}

impl std::fmt::Debug for MinerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerProcess")
            .field("pid", &self.pid)
            .field("binary", &self.binary.path)
            .field("command_line", &self.command_line.to_string())
            .field("api_port", &self.api_port)
            .finish()
    }
}

impl MinerProcess {
    /// 启动进程，掩码非零时立即绑定CPU
    ///
    /// `capture_output` 为真时接管标准输出和标准错误，调用方必须持续读取。
    pub fn spawn(
        binary: &MinerBinary,
        command_line: CommandLine,
        api_port: Option<u16>,
        affinity_mask: u64,
        capture_output: bool,
    ) -> Result<Self, SupervisorError> {
        let output = || {
            if capture_output {
                Stdio::piped()
            } else {
                Stdio::null()
            }
        };

        let child = Command::new(&binary.path)
            .args(command_line.args())
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed {
                path: binary.path.clone(),
                error: e.to_string(),
            })?;

        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            path: binary.path.clone(),
            error: "process exited before pid was read".to_string(),
        })?;

        info!(
            "启动挖矿进程 {} (PID: {}): {}",
            binary.process_name, pid, command_line
        );

        if affinity_mask != 0 {
            match apply_affinity(pid, affinity_mask) {
                Ok(()) => info!("进程 {} 已绑定到CPU掩码 {:#x}", pid, affinity_mask),
                Err(e) => warn!("进程 {} 绑定CPU掩码 {:#x} 失败: {}", pid, affinity_mask, e),
            }
        }

        Ok(Self {
            child,
            pid,
            binary: binary.clone(),
            command_line,
            api_port,
            started_at: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn binary(&self) -> &MinerBinary {
        &self.binary
    }

    pub fn command_line(&self) -> &CommandLine {
        &self.command_line
    }

    pub fn api_port(&self) -> Option<u16> {
        self.api_port
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// 进程已退出时返回退出状态
    pub fn try_exited(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!("查询进程 {} 状态失败: {}", self.pid, e);
                None
            }
        }
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// 结束进程并回收
    ///
    /// 先请求正常退出，超时后强制结束。
    pub async fn terminate(mut self, timeout: Duration) -> Result<ExitStatus, SupervisorError> {
        if let Some(status) = self.try_exited() {
            debug!("进程 {} 已退出: {}", self.pid, status);
            return Ok(status);
        }

        if let Err(e) = request_shutdown(&mut self.child, self.pid) {
            warn!("向进程 {} 发送退出信号失败: {}", self.pid, e);
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("进程 {} 已退出: {}", self.pid, status);
                Ok(status)
            }
            Ok(Err(e)) => Err(SupervisorError::StopFailed {
                pid: self.pid,
                error: e.to_string(),
            }),
            Err(_) => {
                warn!("进程 {} 在 {:?} 内未退出，强制结束", self.pid, timeout);
                self.child
                    .kill()
                    .await
                    .map_err(|e| SupervisorError::StopFailed {
                        pid: self.pid,
                        error: e.to_string(),
                    })?;
                self.child.wait().await.map_err(|e| SupervisorError::StopFailed {
                    pid: self.pid,
                    error: e.to_string(),
                })
            }
        }
    }
}

#[cfg(unix)]
fn request_shutdown(_child: &mut Child, pid: u32) -> Result<(), String> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child, _pid: u32) -> Result<(), String> {
    child.start_kill().map_err(|e| e.to_string())
}

/// 把进程绑定到掩码中的CPU
#[cfg(target_os = "linux")]
pub fn apply_affinity(pid: u32, mask: u64) -> Result<(), String> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    for cpu in (0..64usize).filter(|cpu| mask & (1u64 << cpu) != 0) {
        cpu_set.set(cpu).map_err(|e| e.to_string())?;
    }
    sched_setaffinity(Pid::from_raw(pid as i32), &cpu_set).map_err(|e| e.to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn apply_affinity(_pid: u32, _mask: u64) -> Result<(), String> {
    Err("CPU affinity is not supported on this platform".to_string())
}
