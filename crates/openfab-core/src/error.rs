//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenFabError {
    #[error("设备错误: {0}")]
    Device(String),

    #[error("平台垫片错误: {0}")]
    Shim(String),

    #[error("能力信息错误: {0}")]
    Info(String),

    #[error("注册表错误: {0}")]
    Registry(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("未知错误: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, OpenFabError>;
