//! 挖矿程序变体

use crate::detect::CpuExtension;
use fleetminer_core::AlgorithmType;
use std::path::{Path, PathBuf};

/// 挖矿程序族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFamily {
    /// 主程序，提供本地遥测接口
    Primary,
    /// 旧版 hodl 程序，没有遥测接口
    Legacy,
}

impl BinaryFamily {
    pub fn of(algorithm: &AlgorithmType) -> Self {
        match algorithm {
            AlgorithmType::Hodl => BinaryFamily::Legacy,
            _ => BinaryFamily::Primary,
        }
    }

    pub fn has_telemetry(&self) -> bool {
        matches!(self, BinaryFamily::Primary)
    }
}

/// 程序路径及其进程名
///
/// 进程名取可执行文件名，用于统计存活进程。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MinerBinary {
    pub path: PathBuf,
    pub process_name: String,
}

impl MinerBinary {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let process_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, process_name }
    }
}

/// 同一指令集等级下的一对程序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerBinaries {
    pub primary: MinerBinary,
    pub legacy: MinerBinary,
}

impl MinerBinaries {
    pub fn for_extension(dir: &Path, extension: CpuExtension) -> Self {
        let (primary, legacy) = extension.binary_variants();
        let executable = |stem: &str| {
            MinerBinary::new(dir.join(format!("{}{}", stem, std::env::consts::EXE_SUFFIX)))
        };

        Self {
            primary: executable(primary),
            legacy: executable(legacy),
        }
    }

    pub fn from_paths<P: Into<PathBuf>, L: Into<PathBuf>>(primary: P, legacy: L) -> Self {
        Self {
            primary: MinerBinary::new(primary),
            legacy: MinerBinary::new(legacy),
        }
    }

    pub fn get(&self, family: BinaryFamily) -> &MinerBinary {
        match family {
            BinaryFamily::Primary => &self.primary,
            BinaryFamily::Legacy => &self.legacy,
        }
    }
}
