//! 无遥测接口程序的存活检查

use super::MinerBinary;
use std::path::Path;
use sysinfo::{ProcessStatus, System};

/// Linux 上进程名被截断到的长度
const COMM_LEN: usize = 15;

/// 统计某个挖矿程序当前存活的进程数
pub trait ProcessCounter: Send + Sync {
    fn count(&self, binary: &MinerBinary) -> usize;
}

/// 基于系统进程表的计数
#[derive(Debug, Default)]
pub struct SystemProcessCounter;

impl SystemProcessCounter {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessCounter for SystemProcessCounter {
    fn count(&self, binary: &MinerBinary) -> usize {
        let canonical = std::fs::canonicalize(&binary.path).unwrap_or_else(|_| binary.path.clone());

        let mut system = System::new();
        system.refresh_processes();

        system
            .processes()
            .values()
            .filter(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .filter(|p| matches_binary(p.name(), p.exe(), binary, &canonical))
            .count()
    }
}

fn matches_binary(name: &str, exe: Option<&Path>, binary: &MinerBinary, canonical: &Path) -> bool {
    if exe == Some(canonical) {
        return true;
    }
    if binary.process_name.is_empty() {
        return false;
    }
    name == binary.process_name
        || (name.len() == COMM_LEN && binary.process_name.starts_with(name))
}
