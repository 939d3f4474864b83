//! 算法标识与算法设置

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 已知算法族
///
/// 插件提供的、本库不认识的算法以 `Plugin` 保存其原始标识符。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmType {
    Lyra2REv2,
    Lyra2Z,
    CryptoNight,
    CryptoNightV7,
    /// 旧式算法族，由独立的无遥测接口程序挖矿
    Hodl,
    NeoScrypt,
    Blake2s,
    Keccak,
    X16R,
    DaggerHashimoto,
    Decred,
    Equihash,
    /// 插件自定义算法
    Plugin(String),
}

/// 所有内建算法族（不含插件算法）
static KNOWN_ALGORITHMS: [AlgorithmType; 12] = [
    AlgorithmType::Lyra2REv2,
    AlgorithmType::Lyra2Z,
    AlgorithmType::CryptoNight,
    AlgorithmType::CryptoNightV7,
    AlgorithmType::Hodl,
    AlgorithmType::NeoScrypt,
    AlgorithmType::Blake2s,
    AlgorithmType::Keccak,
    AlgorithmType::X16R,
    AlgorithmType::DaggerHashimoto,
    AlgorithmType::Decred,
    AlgorithmType::Equihash,
];

/// 矿池密码，所有算法族使用同一个固定令牌
const POOL_PASSWORD: &str = "x";

impl AlgorithmType {
    /// 算法的稳定名称
    pub fn name(&self) -> &str {
        match self {
            AlgorithmType::Lyra2REv2 => "Lyra2REv2",
            AlgorithmType::Lyra2Z => "Lyra2Z",
            AlgorithmType::CryptoNight => "CryptoNight",
            AlgorithmType::CryptoNightV7 => "CryptoNightV7",
            AlgorithmType::Hodl => "Hodl",
            AlgorithmType::NeoScrypt => "NeoScrypt",
            AlgorithmType::Blake2s => "Blake2s",
            AlgorithmType::Keccak => "Keccak",
            AlgorithmType::X16R => "X16R",
            AlgorithmType::DaggerHashimoto => "DaggerHashimoto",
            AlgorithmType::Decred => "Decred",
            AlgorithmType::Equihash => "Equihash",
            AlgorithmType::Plugin(name) => name,
        }
    }

    /// 传给挖矿程序 `--algo=` 的默认名称
    pub fn miner_name(&self) -> String {
        match self {
            AlgorithmType::DaggerHashimoto => "ethash".to_string(),
            AlgorithmType::Plugin(name) => name.to_lowercase(),
            other => other.name().to_lowercase(),
        }
    }

    /// 连接矿池时使用的密码令牌
    pub fn pool_password(&self) -> &'static str {
        POOL_PASSWORD
    }

    /// 内建算法族列表
    pub fn known() -> &'static [AlgorithmType] {
        &KNOWN_ALGORITHMS
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AlgorithmType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // '-' 是多算法标识的分隔符
        if s.is_empty() || s.contains('-') {
            return Err(CoreError::parse("算法标识", s));
        }

        let known = KNOWN_ALGORITHMS
            .iter()
            .find(|algo| algo.name().eq_ignore_ascii_case(s));

        Ok(match known {
            Some(algo) => algo.clone(),
            None => AlgorithmType::Plugin(s.to_string()),
        })
    }
}

/// 算法标识组
///
/// 单算法只有一个元素，双挖算法按 (主算法, 副算法) 顺序保存。
/// 顺序参与比较，序列化为以 `-` 连接的字符串标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlgorithmIds(Vec<AlgorithmType>);

impl AlgorithmIds {
    pub fn new(ids: Vec<AlgorithmType>) -> Result<Self, CoreError> {
        if ids.is_empty() {
            return Err(CoreError::parse("算法标识组", ""));
        }
        Ok(Self(ids))
    }

    pub fn single(id: AlgorithmType) -> Self {
        Self(vec![id])
    }

    /// 主算法
    pub fn primary(&self) -> &AlgorithmType {
        &self.0[0]
    }

    pub fn as_slice(&self) -> &[AlgorithmType] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &AlgorithmType) -> bool {
        self.0.contains(id)
    }

    /// 以 `-` 连接的字符串标识，例如 `DaggerHashimoto-Decred`
    pub fn string_id(&self) -> String {
        self.0
            .iter()
            .map(|id| id.name())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl From<AlgorithmType> for AlgorithmIds {
    fn from(id: AlgorithmType) -> Self {
        Self::single(id)
    }
}

impl fmt::Display for AlgorithmIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_id())
    }
}

impl FromStr for AlgorithmIds {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids = s
            .split('-')
            .map(AlgorithmType::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ids)
    }
}

impl TryFrom<String> for AlgorithmIds {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlgorithmIds> for String {
    fn from(ids: AlgorithmIds) -> Self {
        ids.string_id()
    }
}

/// 插件版本（主版本.次版本）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
}

impl PluginVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PluginVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| CoreError::parse("插件版本", s))?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| CoreError::parse("插件版本", s))?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

/// 提供算法列表的模块（插件或内建挖矿程序）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 模块唯一标识（插件UUID）
    pub id: String,
    /// 显示名称
    pub name: String,
    /// 模块版本
    #[serde(with = "version_string")]
    pub version: PluginVersion,
}

impl ModuleInfo {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, version: PluginVersion) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
        }
    }
}

/// 一个设备内算法设置的唯一键：(模块标识, 算法标识组)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlgorithmKey {
    pub module_id: String,
    pub ids: AlgorithmIds,
}

impl AlgorithmKey {
    pub fn new<S: Into<String>>(module_id: S, ids: AlgorithmIds) -> Self {
        Self {
            module_id: module_id.into(),
            ids,
        }
    }
}

impl fmt::Display for AlgorithmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_id, self.ids)
    }
}

/// 模块注册时提供的算法定义
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmDefinition {
    pub ids: AlgorithmIds,
    pub miner_name: String,
    pub enabled: bool,
    pub extra_launch_parameters: String,
}

impl AlgorithmDefinition {
    pub fn new(ids: AlgorithmIds) -> Self {
        let miner_name = ids.primary().miner_name();
        Self {
            ids,
            miner_name,
            enabled: true,
            extra_launch_parameters: String::new(),
        }
    }

    pub fn with_miner_name<S: Into<String>>(mut self, miner_name: S) -> Self {
        self.miner_name = miner_name.into();
        self
    }

    pub fn with_extra_launch_parameters<S: Into<String>>(mut self, params: S) -> Self {
        self.extra_launch_parameters = params.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 设备上某个算法的可调设置
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmSetting {
    /// 所属模块
    pub module: ModuleInfo,
    /// 算法标识组
    pub ids: AlgorithmIds,
    /// 传给挖矿程序的算法名
    pub miner_name: String,
    pub enabled: bool,
    /// 基准测试速度（H/s），每个算法标识一个槽位
    pub speeds: Vec<f64>,
    /// 追加到命令行的自定义参数
    pub extra_launch_parameters: String,
    /// 预估功耗（W）
    pub power_usage: f64,
    /// 设置所对应的配置版本
    pub config_version: PluginVersion,
}

impl AlgorithmSetting {
    /// 由模块定义创建一个未经基准测试的设置
    pub fn from_definition(module: &ModuleInfo, definition: &AlgorithmDefinition) -> Self {
        Self {
            module: module.clone(),
            ids: definition.ids.clone(),
            miner_name: definition.miner_name.clone(),
            enabled: definition.enabled,
            speeds: vec![0.0; definition.ids.len()],
            extra_launch_parameters: definition.extra_launch_parameters.clone(),
            power_usage: 0.0,
            config_version: module.version,
        }
    }

    pub fn key(&self) -> AlgorithmKey {
        AlgorithmKey::new(self.module.id.clone(), self.ids.clone())
    }

    pub fn module_id(&self) -> &str {
        &self.module.id
    }

    pub fn matches(&self, key: &AlgorithmKey) -> bool {
        self.module.id == key.module_id && self.ids == key.ids
    }

    /// 主算法
    pub fn algorithm_type(&self) -> &AlgorithmType {
        self.ids.primary()
    }

    /// 主算法的基准速度，未测试时为 0
    pub fn benchmark_speed(&self) -> f64 {
        self.speeds.first().copied().unwrap_or(0.0)
    }

    /// 副算法的基准速度，单算法时为 0
    pub fn secondary_benchmark_speed(&self) -> f64 {
        self.speeds.get(1).copied().unwrap_or(0.0)
    }

    pub fn set_benchmark_speed(&mut self, speed: f64) {
        if self.speeds.is_empty() {
            self.speeds.push(speed);
        } else {
            self.speeds[0] = speed;
        }
    }

    pub fn set_secondary_benchmark_speed(&mut self, speed: f64) {
        if self.speeds.len() < 2 {
            self.speeds.resize(2, 0.0);
        }
        self.speeds[1] = speed;
    }

    pub fn is_benchmarked(&self) -> bool {
        self.speeds.iter().any(|speed| *speed > 0.0)
    }
}

mod version_string {
    use super::PluginVersion;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(version: &PluginVersion, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(version)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PluginVersion, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
