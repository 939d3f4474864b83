//! CPU指令集检测
//!
//! 根据主机支持的最高指令集选择挖矿程序变体。强制指令集不受支持时，
//! 检测结果会携带降级后的偏好，由调用方负责持久化。

use crate::error::DetectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// CPU指令集扩展等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuExtension {
    Sse2,
    Avx,
    Avx2,
}

impl CpuExtension {
    /// 自动检测时的探测顺序，从最高等级开始
    pub const PROBE_ORDER: [CpuExtension; 3] =
        [CpuExtension::Avx2, CpuExtension::Avx, CpuExtension::Sse2];

    /// 主程序与旧版 hodl 程序的文件名（不含扩展名）
    pub fn binary_variants(&self) -> (&'static str, &'static str) {
        match self {
            CpuExtension::Sse2 => ("cpuminer_x64_SSE2", "hodlminer_core2"),
            CpuExtension::Avx => ("cpuminer_x64_AVX", "hodlminer_corei7_avx"),
            CpuExtension::Avx2 => ("cpuminer_x64_AVX2", "hodlminer_core_avx2"),
        }
    }
}

impl fmt::Display for CpuExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuExtension::Sse2 => write!(f, "SSE2"),
            CpuExtension::Avx => write!(f, "AVX"),
            CpuExtension::Avx2 => write!(f, "AVX2"),
        }
    }
}

/// 持久化的指令集偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceExtension {
    #[default]
    Automatic,
    Sse2,
    Avx,
    Avx2,
}

impl ForceExtension {
    pub fn forced(&self) -> Option<CpuExtension> {
        match self {
            ForceExtension::Automatic => None,
            ForceExtension::Sse2 => Some(CpuExtension::Sse2),
            ForceExtension::Avx => Some(CpuExtension::Avx),
            ForceExtension::Avx2 => Some(CpuExtension::Avx2),
        }
    }
}

impl From<CpuExtension> for ForceExtension {
    fn from(ext: CpuExtension) -> Self {
        match ext {
            CpuExtension::Sse2 => ForceExtension::Sse2,
            CpuExtension::Avx => ForceExtension::Avx,
            CpuExtension::Avx2 => ForceExtension::Avx2,
        }
    }
}

/// CPU特性查询接口
#[cfg_attr(test, mockall::automock)]
pub trait CpuFeatureProbe: Send + Sync {
    fn supports(&self, extension: CpuExtension) -> bool;

    /// 处理器型号名称
    fn brand(&self) -> String;
}

/// 基于 CPUID 指令的主机探测
#[derive(Debug, Clone, Default)]
pub struct HostCpuProbe {
    sse2: bool,
    avx: bool,
    avx2: bool,
    brand: String,
}

impl HostCpuProbe {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub fn new() -> Self {
        let cpuid = raw_cpuid::CpuId::new();
        let features = cpuid.get_feature_info();
        let sse2 = features.as_ref().map(|f| f.has_sse2()).unwrap_or(false);
        // AVX 需要操作系统开启 XSAVE 才能使用
        let avx = features
            .as_ref()
            .map(|f| f.has_avx() && f.has_oxsave())
            .unwrap_or(false);
        let avx2 = avx
            && cpuid
                .get_extended_feature_info()
                .map(|f| f.has_avx2())
                .unwrap_or(false);
        let brand = cpuid
            .get_processor_brand_string()
            .map(|b| b.as_str().trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "Unknown CPU".to_string());

        Self {
            sse2,
            avx,
            avx2,
            brand,
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    pub fn new() -> Self {
        Self {
            brand: "Unknown CPU".to_string(),
            ..Self::default()
        }
    }
}

impl CpuFeatureProbe for HostCpuProbe {
    fn supports(&self, extension: CpuExtension) -> bool {
        match extension {
            CpuExtension::Sse2 => self.sse2,
            CpuExtension::Avx => self.avx,
            CpuExtension::Avx2 => self.avx2,
        }
    }

    fn brand(&self) -> String {
        self.brand.clone()
    }
}

/// 检测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionOutcome {
    /// 选中的指令集，`None` 表示设备不受支持
    pub extension: Option<CpuExtension>,
    /// 检测后应当持久化的偏好
    pub preference: ForceExtension,
    /// 强制偏好是否因不受支持而被改回自动
    pub downgraded: bool,
}

impl DetectionOutcome {
    pub fn require(&self, device: &str) -> Result<CpuExtension, DetectError> {
        self.extension.ok_or_else(|| DetectError::UnsupportedCpu {
            device: device.to_string(),
        })
    }
}

/// 按偏好检测可用指令集
pub fn detect(probe: &dyn CpuFeatureProbe, preferred: ForceExtension) -> DetectionOutcome {
    let mut preference = preferred;
    let mut downgraded = false;

    if let Some(forced) = preferred.forced() {
        if probe.supports(forced) {
            info!("使用强制指定的指令集: {}", forced);
            return DetectionOutcome {
                extension: Some(forced),
                preference,
                downgraded,
            };
        }
        warn!("强制指定的指令集 {} 不受支持，改为自动检测", forced);
        preference = ForceExtension::Automatic;
        downgraded = true;
    }

    let extension = CpuExtension::PROBE_ORDER
        .into_iter()
        .find(|ext| probe.supports(*ext));

    match extension {
        Some(ext) => info!("检测到指令集: {} ({})", ext, probe.brand()),
        None => warn!("CPU不支持任何可用指令集，设备将被排除: {}", probe.brand()),
    }

    DetectionOutcome {
        extension,
        preference,
        downgraded,
    }
}
