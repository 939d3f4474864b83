//! 错误类型定义

use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("设备错误: {0}")]
    Device(#[from] DeviceError),

    #[error("解析错误: '{input}' 不是有效的{what}")]
    Parse { what: &'static str, input: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 设备错误类型
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("设备不支持的操作: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("设备配置无效: {message}")]
    InvalidConfiguration { message: String },
}

impl CoreError {
    /// 创建解析错误
    pub fn parse<S: Into<String>>(what: &'static str, input: S) -> Self {
        Self::Parse {
            what,
            input: input.into(),
        }
    }
}

impl DeviceError {
    /// 创建不支持操作错误
    pub fn unsupported_operation<S: Into<String>>(operation: S) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// 创建配置无效错误
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }
}
