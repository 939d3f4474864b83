//! 统一的算力格式化工具
//!
//! 内部算力统一以 H/s 存储，显示时再换算单位。

const UNITS: [(f64, &str); 5] = [
    (1e15, "PH/s"),
    (1e12, "TH/s"),
    (1e9, "GH/s"),
    (1e6, "MH/s"),
    (1e3, "KH/s"),
];

/// 格式化算力显示（智能单位自适应）
///
/// 显示值保持在 1 到 999 之间，精度随数值大小递减。
///
/// # 示例
/// ```
/// use fleetminer_rs::utils::hashrate_formatter::format_hashrate;
///
/// assert_eq!(format_hashrate(1234.0), "1.234 KH/s");
/// assert_eq!(format_hashrate(1234567.0), "1.235 MH/s");
/// ```
pub fn format_hashrate(hashrate: f64) -> String {
    if !hashrate.is_finite() {
        return "∞ H/s".to_string();
    }
    if hashrate <= 0.0 {
        return "0.00 H/s".to_string();
    }

    let (value, unit) = UNITS
        .iter()
        .find(|(scale, _)| hashrate >= *scale)
        .map(|(scale, unit)| (hashrate / scale, *unit))
        .unwrap_or((hashrate, "H/s"));

    if value >= 100.0 {
        format!("{:.1} {}", value, unit)
    } else if value >= 10.0 {
        format!("{:.2} {}", value, unit)
    } else if value >= 1.0 {
        format!("{:.3} {}", value, unit)
    } else {
        format!("{:.6} {}", value, unit)
    }
}

/// 以 kH/s 固定三位小数显示，用于挖矿程序摘要
///
/// ```
/// use fleetminer_rs::utils::format_khs;
///
/// assert_eq!(format_khs(1234.0), "1.234 kH/s");
/// ```
pub fn format_khs(speed: f64) -> String {
    format!("{:.3} kH/s", speed * 0.001)
}

/// 解析算力字符串为 H/s 数值
///
/// 支持 "1.5 GH/s"、"2.3G"、"812.44 kH/s" 等形式，单位大小写不敏感。
pub fn parse_hashrate(hashrate_str: &str) -> Option<f64> {
    let s = hashrate_str.trim().to_uppercase();
    let s = s.strip_suffix("/S").unwrap_or(&s);

    let split_pos = s.find(|c: char| c.is_alphabetic());
    let Some(split_pos) = split_pos else {
        // 没有单位，按 H/s 处理
        return s.trim().parse::<f64>().ok();
    };

    let (number_part, unit_part) = s.split_at(split_pos);
    let number = number_part.trim().parse::<f64>().ok()?;

    let multiplier = match unit_part.trim() {
        "H" => 1.0,
        "KH" | "K" => 1e3,
        "MH" | "M" => 1e6,
        "GH" | "G" => 1e9,
        "TH" | "T" => 1e12,
        "PH" | "P" => 1e15,
        _ => return None,
    };

    Some(number * multiplier)
}
