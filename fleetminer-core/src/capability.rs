//! 设备监控能力特征
//!
//! 不同硬件的监控接口（NVML、ADL、CPU传感器等）只实现它们真正支持的能力。
//! 每个能力都是一个独立的特征，`DeviceMonitor` 通过 `as_*` 方法按需暴露，
//! 默认全部返回 `None`，调用方必须把"能力缺失"作为正常结果处理。

use crate::error::DeviceError;
use serde::{Deserialize, Serialize};

/// 读数不可用时的哨兵值
pub const UNSUPPORTED_READING: f32 = -1.0;

/// 风扇转速不可用时的哨兵值
pub const UNSUPPORTED_FAN_SPEED: i32 = -1;

/// 功耗不可用时的哨兵值
pub const UNSUPPORTED_POWER_USAGE: f64 = -1.0;

/// 功耗目标不可用时的哨兵值
pub const UNSUPPORTED_POWER_TARGET: u32 = 0;

/// 分级功耗档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerLevel {
    /// 设备不支持功耗档位
    #[default]
    Unsupported,
    Low,
    Medium,
    High,
    /// 使用自定义功耗目标百分比
    Custom,
}

impl PowerLevel {
    /// 可以直接下发给 `SetPowerLevel` 的档位
    pub fn is_tiered(&self) -> bool {
        matches!(self, PowerLevel::Low | PowerLevel::Medium | PowerLevel::High)
    }
}

/// 读取功耗目标（百分比）
pub trait PowerTarget: Send + Sync {
    fn power_target(&self) -> u32;
}

/// 读取当前功耗档位
pub trait PowerLevelReadout: Send + Sync {
    fn power_level(&self) -> PowerLevel;
}

/// 设置功耗档位
pub trait SetPowerLevel: Send + Sync {
    fn set_power_level(&self, level: PowerLevel) -> Result<(), DeviceError>;
}

/// 设置自定义功耗目标百分比
pub trait SetPowerTargetPercentage: Send + Sync {
    fn set_power_target_percentage(&self, percentage: f64) -> Result<(), DeviceError>;
}

/// 读取负载（%）
pub trait Load: Send + Sync {
    fn load(&self) -> f32;
}

/// 读取温度（°C）
pub trait Temperature: Send + Sync {
    fn temperature(&self) -> f32;
}

/// 读取风扇转速（%或RPM，取决于驱动）
pub trait FanSpeed: Send + Sync {
    fn fan_speed(&self) -> i32;
}

/// 读取实时功耗（W）
pub trait PowerUsage: Send + Sync {
    fn power_usage(&self) -> f64;
}

/// 设备监控器
///
/// 实现者只覆盖自己支持的 `as_*` 方法。
pub trait DeviceMonitor: Send + Sync {
    /// 被监控设备的UUID
    fn device_uuid(&self) -> &str;

    fn as_power_target(&self) -> Option<&dyn PowerTarget> {
        None
    }

    fn as_power_level(&self) -> Option<&dyn PowerLevelReadout> {
        None
    }

    fn as_set_power_level(&self) -> Option<&dyn SetPowerLevel> {
        None
    }

    fn as_set_power_target_percentage(&self) -> Option<&dyn SetPowerTargetPercentage> {
        None
    }

    fn as_load(&self) -> Option<&dyn Load> {
        None
    }

    fn as_temperature(&self) -> Option<&dyn Temperature> {
        None
    }

    fn as_fan_speed(&self) -> Option<&dyn FanSpeed> {
        None
    }

    fn as_power_usage(&self) -> Option<&dyn PowerUsage> {
        None
    }
}
