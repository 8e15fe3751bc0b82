//! 硬件调用边界
//!
//! 生产代码只通过这五个具名调用点触达硬件原语，每个调用点同一时刻
//! 只有一个活动实现，测试可逐点替换为测试替身

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::device::FabricDevice;

pub type VerbsResult<T> = Result<T, VerbsError>;

#[derive(Debug, thiserror::Error)]
pub enum VerbsError {
    #[error("Driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    #[error("Queue creation failed: {0}")]
    QueueCreationFailed(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// 设备原生地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAddress {
    pub gid: [u8; 16],
    pub qpn: u32,
}

/// 地址句柄，对调用方不透明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressHandle(pub u64);

/// 查询到的设备属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttrs {
    pub max_msg_size: usize,
    pub inline_buf_size: usize,
    pub max_cq_depth: usize,
    pub max_send_sge: u32,
    pub max_recv_sge: u32,
    pub supports_rdma_read: bool,
}

impl Default for DeviceAttrs {
    fn default() -> Self {
        Self {
            max_msg_size: 8928,
            inline_buf_size: 32,
            max_cq_depth: 4096,
            max_send_sge: 2,
            max_recv_sge: 1,
            supports_rdma_read: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOp {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    LocalProtocolError,
    RemoteUnreachable,
    BadResponse,
    FlushError,
}

/// 一条完成记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub wr_id: u64,
    pub op: CompletionOp,
    pub status: CompletionStatus,
    pub byte_len: usize,
}

/// 完成队列句柄
///
/// 轮询状态机属于上层消费方，这里只暴露读取一条记录的原语
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    fn depth(&self) -> usize;

    /// 读取一条完成记录；队列为空时返回 None
    async fn read_one(&self) -> VerbsResult<Option<Completion>>;
}

/// 设备内存句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMemory {
    pub handle: u64,
    pub len: usize,
}

/// 五个可替换的硬件调用点
#[async_trait]
pub trait VerbsInterface: Send + Sync {
    /// 为对端原生地址创建地址句柄
    async fn create_address_handle(
        &self,
        device: &FabricDevice,
        addr: &RawAddress,
    ) -> VerbsResult<AddressHandle>;

    /// 查询设备能力属性
    async fn query_device(&self, device: &FabricDevice) -> VerbsResult<DeviceAttrs>;

    /// 创建完成队列
    async fn create_completion_queue(
        &self,
        device: &FabricDevice,
        depth: usize,
    ) -> VerbsResult<Arc<dyn CompletionQueue>>;

    /// 分配设备内存
    async fn alloc_device_memory(
        &self,
        device: &FabricDevice,
        len: usize,
    ) -> VerbsResult<DeviceMemory>;

    /// 从设备内存拷出数据
    async fn copy_from_device_memory(
        &self,
        mem: &DeviceMemory,
        offset: usize,
        len: usize,
    ) -> VerbsResult<Vec<u8>>;
}

/// 生产实现：经内核 verbs 接口触达适配器
///
/// 数据通路调用依赖厂商用户态驱动；未安装驱动的主机上这些调用
/// 返回 `DriverUnavailable`，设备属性查询退回保守默认值。
pub struct SystemVerbs {
    driver_present: bool,
}

impl SystemVerbs {
    pub fn new() -> Self {
        Self {
            driver_present: Self::probe_driver(),
        }
    }

    pub fn driver_present(&self) -> bool {
        self.driver_present
    }

    fn probe_driver() -> bool {
        #[cfg(target_os = "linux")]
        {
            std::path::Path::new("/dev/infiniband").exists()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }

    fn ensure_driver(&self) -> VerbsResult<()> {
        if self.driver_present {
            Ok(())
        } else {
            Err(VerbsError::DriverUnavailable(
                "kernel verbs interface not present".to_string(),
            ))
        }
    }
}

impl Default for SystemVerbs {
    fn default() -> Self {
        Self::new()
    }
}

fn device_node_present(name: &str) -> bool {
    if cfg!(target_os = "linux") {
        std::path::Path::new("/sys/class/infiniband")
            .join(name)
            .exists()
    } else {
        false
    }
}

#[async_trait]
impl VerbsInterface for SystemVerbs {
    async fn create_address_handle(
        &self,
        _device: &FabricDevice,
        _addr: &RawAddress,
    ) -> VerbsResult<AddressHandle> {
        self.ensure_driver()?;
        Err(VerbsError::DriverUnavailable(
            "address handle creation requires the vendor user-space driver".to_string(),
        ))
    }

    async fn query_device(&self, device: &FabricDevice) -> VerbsResult<DeviceAttrs> {
        self.ensure_driver()?;
        if !device_node_present(&device.name) {
            return Err(VerbsError::DeviceNotFound(device.name.clone()));
        }
        Ok(DeviceAttrs::default())
    }

    async fn create_completion_queue(
        &self,
        _device: &FabricDevice,
        _depth: usize,
    ) -> VerbsResult<Arc<dyn CompletionQueue>> {
        self.ensure_driver()?;
        Err(VerbsError::DriverUnavailable(
            "completion queues require the vendor user-space driver".to_string(),
        ))
    }

    async fn alloc_device_memory(
        &self,
        _device: &FabricDevice,
        _len: usize,
    ) -> VerbsResult<DeviceMemory> {
        self.ensure_driver()?;
        Err(VerbsError::DriverUnavailable(
            "device memory allocation requires the vendor user-space driver".to_string(),
        ))
    }

    async fn copy_from_device_memory(
        &self,
        _mem: &DeviceMemory,
        _offset: usize,
        _len: usize,
    ) -> VerbsResult<Vec<u8>> {
        self.ensure_driver()?;
        Err(VerbsError::DriverUnavailable(
            "device memory copy requires the vendor user-space driver".to_string(),
        ))
    }
}
