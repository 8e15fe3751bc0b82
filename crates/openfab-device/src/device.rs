//! 设备枚举与描述符
//!
//! 枚举可用的 fabric 适配器，并在枚举时预查询每块设备的数据报能力记录

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use openfab_core::{
    AddressFormat, CapabilityFlags, CapabilityInfo, EndpointStyle, PROVIDER_NAME, SizeLimits,
};

use crate::verbs::{DeviceAttrs, VerbsInterface};

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// 一块物理 fabric 适配器的描述符
///
/// 由枚举器创建并持有，生命周期核心只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricDevice {
    pub name: String,
    pub node_guid: u64,
    /// 枚举时预查询好的数据报能力记录；预查询失败时为空
    pub dgram_info: Option<CapabilityInfo>,
}

impl FabricDevice {
    pub fn domain_name(&self, style: EndpointStyle) -> String {
        format!("{}-{}", self.name, style.as_str())
    }
}

/// 由设备属性派生数据报风格的能力记录
pub fn dgram_info_for(device_name: &str, attrs: &DeviceAttrs) -> CapabilityInfo {
    CapabilityInfo {
        fabric_name: PROVIDER_NAME.to_string(),
        domain_name: format!("{}-{}", device_name, EndpointStyle::Dgram.as_str()),
        endpoint_style: EndpointStyle::Dgram,
        addr_format: AddressFormat::Raw,
        limits: SizeLimits {
            max_msg_size: attrs.max_msg_size,
            inject_size: attrs.inline_buf_size,
            addr_len: 32,
            cq_depth: attrs.max_cq_depth,
        },
        flags: CapabilityFlags::dgram(),
    }
}

/// 设备枚举边界
///
/// 枚举失败使整个启动流程中止；返回空列表表示"无可提供的设备"，
/// 不是错误
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// 按固定顺序返回可用设备列表
    async fn enumerate(&self) -> DeviceResult<Vec<FabricDevice>>;

    /// 收尾时释放设备列表持有的外部资源
    async fn release(&self) {}
}

/// 生产枚举器：扫描 sysfs 下的 RDMA 设备类目录
pub struct SysfsEnumerator {
    class_dir: PathBuf,
    name_prefix: String,
    verbs: Arc<dyn VerbsInterface>,
}

impl SysfsEnumerator {
    const CLASS_DIR: &'static str = "/sys/class/infiniband";
    const NAME_PREFIX: &'static str = "ofab";

    pub fn new(verbs: Arc<dyn VerbsInterface>) -> Self {
        Self {
            class_dir: PathBuf::from(Self::CLASS_DIR),
            name_prefix: Self::NAME_PREFIX.to_string(),
            verbs,
        }
    }

    /// 覆盖类目录与名称前缀，用于非标准 sysfs 布局
    pub fn with_class_dir(
        class_dir: impl Into<PathBuf>,
        name_prefix: impl Into<String>,
        verbs: Arc<dyn VerbsInterface>,
    ) -> Self {
        Self {
            class_dir: class_dir.into(),
            name_prefix: name_prefix.into(),
            verbs,
        }
    }

    fn read_node_guid(&self, device_name: &str) -> u64 {
        let path = self.class_dir.join(device_name).join("node_guid");
        match std::fs::read_to_string(&path) {
            Ok(raw) => parse_node_guid(raw.trim()),
            Err(_) => 0,
        }
    }
}

/// 解析 sysfs 的 "0248:ffff:fe00:0001" 形式 GUID；解析失败返回 0
fn parse_node_guid(raw: &str) -> u64 {
    let hex: String = raw.chars().filter(|c| *c != ':').collect();
    u64::from_str_radix(&hex, 16).unwrap_or(0)
}

#[async_trait]
impl DeviceEnumerator for SysfsEnumerator {
    async fn enumerate(&self) -> DeviceResult<Vec<FabricDevice>> {
        if !self.class_dir.exists() {
            debug!(dir = %self.class_dir.display(), "device class directory absent");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.class_dir)
            .map_err(|e| DeviceError::EnumerationFailed(e.to_string()))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&self.name_prefix))
            .collect();
        // read_dir 顺序不稳定，排序保证枚举顺序固定
        names.sort();

        let mut devices = Vec::with_capacity(names.len());
        for name in names {
            let node_guid = self.read_node_guid(&name);
            let mut device = FabricDevice {
                name,
                node_guid,
                dgram_info: None,
            };

            match self.verbs.query_device(&device).await {
                Ok(attrs) => {
                    device.dgram_info = Some(dgram_info_for(&device.name, &attrs));
                }
                Err(e) => {
                    warn!(device = %device.name, "datagram capability pre-query failed: {e}");
                }
            }

            devices.push(device);
        }

        debug!(count = devices.len(), "device enumeration complete");
        Ok(devices)
    }
}
