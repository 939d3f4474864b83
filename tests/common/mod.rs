//! 集成测试公共工具
//!
//! 使用 `virtual-cpuminer` 作为真实的外部挖矿进程。

#![allow(dead_code)]

use fleetminer_core::{
    AlgorithmDefinition, AlgorithmIds, AlgorithmKey, AlgorithmType, BaseDevice, ComputeDevice,
    DeviceType,
};
use fleetminer_rs::device::{cpuminer_module, CPUMINER_MODULE_ID};
use fleetminer_rs::miner::{MinerBinaries, MinerBinary, MinerSettings, MinerSupervisor, ProcessCounter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const VIRTUAL_MINER: &str = env!("CARGO_BIN_EXE_virtual-cpuminer");

/// 可在测试中修改返回值的进程计数
#[derive(Default)]
pub struct StubCounter {
    alive: AtomicUsize,
    /// 每次计数阻塞当前线程的时间
    delay: Duration,
}

impl StubCounter {
    pub fn new(alive: usize) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicUsize::new(alive),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(alive: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicUsize::new(alive),
            delay,
        })
    }

    pub fn set(&self, alive: usize) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

impl ProcessCounter for StubCounter {
    fn count(&self, _binary: &MinerBinary) -> usize {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.alive.load(Ordering::SeqCst)
    }
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn settings() -> MinerSettings {
    let mut settings = MinerSettings::new(MinerBinaries::from_paths(VIRTUAL_MINER, VIRTUAL_MINER));
    settings.threads = 2;
    settings.api_port = free_port();
    settings.warmup = Duration::from_secs(30);
    settings.api_timeout = Duration::from_secs(1);
    settings.stop_timeout = Duration::from_secs(2);
    settings.benchmark_grace = Duration::from_secs(5);
    settings.legacy_expected_processes = 4;
    settings
}

/// 注册了内建算法的CPU设备，`extra` 作为每个算法的附加参数
pub fn cpu_device(extra: &str) -> ComputeDevice {
    let mut device = ComputeDevice::new(
        BaseDevice::new(0, DeviceType::Cpu, "CPU-test-0", "Virtual CPU"),
        0,
        "CPU#1",
    );
    let definitions: Vec<AlgorithmDefinition> = [
        AlgorithmType::Lyra2REv2,
        AlgorithmType::Lyra2Z,
        AlgorithmType::Hodl,
    ]
    .into_iter()
    .map(|algo| AlgorithmDefinition::new(algo.into()).with_extra_launch_parameters(extra))
    .collect();
    device.update_plugin_algorithms(&cpuminer_module(), &definitions);
    device
}

pub fn supervisor(extra: &str, settings: MinerSettings, counter: Arc<dyn ProcessCounter>) -> MinerSupervisor {
    MinerSupervisor::new(cpu_device(extra), settings, counter)
}

pub fn key(algorithm: AlgorithmType) -> AlgorithmKey {
    AlgorithmKey::new(CPUMINER_MODULE_ID, AlgorithmIds::single(algorithm))
}

/// 进程是否已不存在（已被回收）
#[cfg(unix)]
pub fn process_gone(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None::<Signal>).is_err()
}
