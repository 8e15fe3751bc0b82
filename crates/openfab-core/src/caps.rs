//! 能力信息数据模型
//!
//! 描述一块网卡设备支持的某种端点通信风格

use serde::{Deserialize, Serialize};

/// 端点通信风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    /// 可靠按序投递，无需显式建连
    Rdm,
    /// 无连接不可靠数据报
    Dgram,
}

impl EndpointStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rdm => "rdm",
            Self::Dgram => "dgram",
        }
    }
}

/// 端点地址格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFormat {
    /// 设备原生地址 (GID + QPN)
    Raw,
    /// IPv4 sockaddr 映射
    Sockaddr,
}

/// 尺寸上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    pub max_msg_size: usize,
    pub inject_size: usize,
    pub addr_len: usize,
    pub cq_depth: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_msg_size: 8928,
            inject_size: 32,
            addr_len: 32,
            cq_depth: 1024,
        }
    }
}

/// 支持的操作特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub message: bool,
    pub tagged: bool,
    pub rma_read: bool,
    pub ordered_delivery: bool,
    pub reliable: bool,
    pub connectionless: bool,
}

impl CapabilityFlags {
    /// RDM 风格的默认特性集
    pub fn rdm() -> Self {
        Self {
            message: true,
            tagged: true,
            rma_read: true,
            ordered_delivery: true,
            reliable: true,
            connectionless: true,
        }
    }

    /// 数据报风格的默认特性集
    pub fn dgram() -> Self {
        Self {
            message: true,
            tagged: false,
            rma_read: false,
            ordered_delivery: false,
            reliable: false,
            connectionless: true,
        }
    }
}

/// 一条能力信息记录：某设备支持的某种端点风格
///
/// 构造后不可变。聚合列表的顺序是对外契约：先按设备枚举顺序排列全部
/// RDM 记录，再按同样顺序排列全部数据报记录，消费方可以两趟扫描分类。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub fabric_name: String,
    pub domain_name: String,
    pub endpoint_style: EndpointStyle,
    pub addr_format: AddressFormat,
    pub limits: SizeLimits,
    pub flags: CapabilityFlags,
}

impl CapabilityInfo {
    pub fn is_rdm(&self) -> bool {
        self.endpoint_style == EndpointStyle::Rdm
    }

    pub fn is_dgram(&self) -> bool {
        self.endpoint_style == EndpointStyle::Dgram
    }
}
