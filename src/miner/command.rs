//! 挖矿程序命令行

use super::PoolEndpoint;
use fleetminer_core::AlgorithmSetting;
use std::fmt;

/// 已拆分为参数列表的命令行
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    /// 挖矿命令行
    ///
    /// `--algo --url --userpass --threads [--api-bind] <设备级参数> <算法级参数>`
    pub fn mining(
        setting: &AlgorithmSetting,
        pool: &PoolEndpoint,
        threads: usize,
        api_port: Option<u16>,
        device_extra: &str,
    ) -> Self {
        let mut command = Self::default();
        command.push(format!("--algo={}", setting.miner_name));
        command.push(format!("--url={}", pool.url));
        command.push(format!(
            "--userpass={}:{}",
            pool.username,
            setting.algorithm_type().pool_password()
        ));
        command.push(format!("--threads={}", threads));
        if let Some(port) = api_port {
            command.push(format!("--api-bind={}", port));
        }
        command.extend_extra(device_extra);
        command.extend_extra(&setting.extra_launch_parameters);
        command
    }

    /// 基准测试命令行，用 `--benchmark` 替换矿池参数
    ///
    /// 没有时间限制时不输出 `--time-limit`，由外部截止时间结束进程。
    pub fn benchmark(
        setting: &AlgorithmSetting,
        threads: usize,
        time_limit: Option<u64>,
        device_extra: &str,
    ) -> Self {
        let mut command = Self::default();
        command.push(format!("--algo={}", setting.miner_name));
        command.push("--benchmark".to_string());
        if let Some(seconds) = time_limit {
            command.push("--time-limit".to_string());
            command.push(seconds.to_string());
        }
        command.push(format!("--threads={}", threads));
        command.extend_extra(device_extra);
        command.extend_extra(&setting.extra_launch_parameters);
        command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn contains(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    fn push(&mut self, arg: String) {
        self.args.push(arg);
    }

    fn extend_extra(&mut self, extra: &str) {
        self.args.extend(extra.split_whitespace().map(str::to_string));
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}
