//! 挖矿程序本地遥测接口
//!
//! 连接 `127.0.0.1:<port>`，发送 `summary`，读取以 `|` 结尾的
//! `KEY=VALUE;...` 记录。

use crate::error::TelemetryError;
use crate::utils::format_khs;
use fleetminer_core::AlgorithmType;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const SUMMARY_COMMAND: &[u8] = b"summary";
const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// 挖矿程序上报的运行数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiData {
    pub algorithm: AlgorithmType,
    pub algorithm_name: String,
    /// 当前算力（H/s）
    pub speed: f64,
}

impl ApiData {
    pub fn new<S: Into<String>>(algorithm: AlgorithmType, algorithm_name: S, speed: f64) -> Self {
        Self {
            algorithm,
            algorithm_name: algorithm_name.into(),
            speed,
        }
    }

    pub fn display_speed(&self) -> String {
        format_khs(self.speed)
    }
}

/// 按挖矿程序使用的名称反查算法
fn algorithm_from_miner_name(name: &str) -> AlgorithmType {
    AlgorithmType::known()
        .iter()
        .find(|algo| algo.miner_name().eq_ignore_ascii_case(name))
        .cloned()
        .unwrap_or_else(|| AlgorithmType::Plugin(name.to_string()))
}

/// 解析 summary 响应
pub fn parse_summary(response: &str) -> Result<ApiData, TelemetryError> {
    let record = response.split('|').next().unwrap_or_default().trim();

    let mut algorithm_name = None;
    let mut khs = None;
    for field in record.split(';') {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ALGO" => algorithm_name = Some(value.trim().to_string()),
            "KHS" => {
                khs = Some(value.trim().parse::<f64>().map_err(|_| {
                    TelemetryError::InvalidResponse {
                        reason: format!("invalid KHS value: {}", value),
                    }
                })?)
            }
            _ => {}
        }
    }

    let algorithm_name = algorithm_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| TelemetryError::InvalidResponse {
            reason: "missing ALGO field".to_string(),
        })?;
    let khs = khs.ok_or_else(|| TelemetryError::InvalidResponse {
        reason: "missing KHS field".to_string(),
    })?;

    Ok(ApiData::new(
        algorithm_from_miner_name(&algorithm_name),
        algorithm_name,
        khs * 1000.0,
    ))
}

/// 查询本地遥测接口，整个交互受 `timeout` 限制
pub async fn query_summary(port: u16, timeout: Duration) -> Result<ApiData, TelemetryError> {
    let exchange = async {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| TelemetryError::ConnectionFailed {
                port,
                error: e.to_string(),
            })?;

        stream
            .write_all(SUMMARY_COMMAND)
            .await
            .map_err(|e| TelemetryError::ConnectionFailed {
                port,
                error: e.to_string(),
            })?;

        let mut response = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| TelemetryError::ConnectionFailed {
                    port,
                    error: e.to_string(),
                })?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);
            if response.contains(&b'|') || response.len() > MAX_RESPONSE_LEN {
                break;
            }
        }

        Ok::<_, TelemetryError>(String::from_utf8_lossy(&response).into_owned())
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TelemetryError::Timeout { port })??;

    debug!("遥测接口 {} 响应: {}", port, response.trim());
    parse_summary(&response)
}
