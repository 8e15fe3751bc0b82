//! 提供者与宿主框架版本常量

use serde::{Deserialize, Serialize};
use std::fmt;

/// 主次版本对
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// 提供者名称，宿主框架按此名称检索分发表
pub const PROVIDER_NAME: &str = "openfab";

/// 提供者自身版本
pub const PROVIDER_VERSION: Version = Version::new(2, 1);

/// 支持的宿主框架 API 版本
pub const FABRIC_API_VERSION: Version = Version::new(1, 14);
