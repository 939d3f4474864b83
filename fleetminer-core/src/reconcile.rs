//! 算法设置合并
//!
//! 模块（插件）升级时会增加、删除或保留算法。合并规则：
//! - 其他模块的设置原样保留；
//! - 本模块仍然提供的算法保留用户数据（基准速度、自定义参数、启用状态、功耗）；
//! - 本模块新增的算法以默认值创建；
//! - 本模块已删除的算法的设置被丢弃。
//!
//! 对同一输入重复合并结果不变。

use crate::algorithm::{AlgorithmDefinition, AlgorithmIds, AlgorithmSetting, ModuleInfo};
use std::collections::HashSet;

/// 把模块提供的新算法列表合并到已有设置中
///
/// 结果顺序：其他模块的设置（原相对顺序），保留下来的设置（原相对顺序），
/// 新建的设置（按 `incoming` 顺序）。
pub fn reconcile(
    existing: Vec<AlgorithmSetting>,
    incoming: &[AlgorithmDefinition],
    module: &ModuleInfo,
) -> Vec<AlgorithmSetting> {
    let incoming_ids: HashSet<&AlgorithmIds> = incoming.iter().map(|def| &def.ids).collect();

    let (owned, mut result): (Vec<_>, Vec<_>) = existing
        .into_iter()
        .partition(|setting| setting.module.id == module.id);

    let mut carried_ids: HashSet<AlgorithmIds> = HashSet::new();
    for mut setting in owned {
        if !incoming_ids.contains(&setting.ids) || carried_ids.contains(&setting.ids) {
            continue;
        }
        // 用户数据不变，模块元数据与算法名跟随新版本
        if let Some(def) = incoming.iter().find(|def| def.ids == setting.ids) {
            setting.miner_name = def.miner_name.clone();
        }
        setting.module = module.clone();
        carried_ids.insert(setting.ids.clone());
        result.push(setting);
    }

    for def in incoming {
        if carried_ids.contains(&def.ids) {
            continue;
        }
        carried_ids.insert(def.ids.clone());
        result.push(AlgorithmSetting::from_definition(module, def));
    }

    result
}

/// 删除某个模块的全部设置（模块被卸载时使用）
pub fn remove_module(existing: Vec<AlgorithmSetting>, module_id: &str) -> Vec<AlgorithmSetting> {
    existing
        .into_iter()
        .filter(|setting| setting.module.id != module_id)
        .collect()
}
