//! 能力信息聚合
//!
//! 为每块设备构造其支持的端点风格记录，汇入一个有序列表。单设备
//! 失败只跳过该设备；两趟都一无所获才算整体失败。

use std::sync::Arc;
use tracing::{debug, warn};

use openfab_core::{
    AddressFormat, CapabilityFlags, CapabilityInfo, EndpointStyle, PROVIDER_NAME, SizeLimits,
};
use openfab_device::{DeviceAttrs, FabricDevice, VerbsInterface};

pub type InfoResult<T> = Result<T, InfoError>;

#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    #[error("no usable capability data")]
    NoData,
}

/// 由设备属性派生 RDM 风格的能力记录
fn rdm_info_for(device: &FabricDevice, attrs: &DeviceAttrs) -> CapabilityInfo {
    let mut flags = CapabilityFlags::rdm();
    flags.rma_read = attrs.supports_rdma_read;

    CapabilityInfo {
        fabric_name: PROVIDER_NAME.to_string(),
        domain_name: device.domain_name(EndpointStyle::Rdm),
        endpoint_style: EndpointStyle::Rdm,
        addr_format: AddressFormat::Raw,
        limits: SizeLimits {
            // RDM 子系统在数据报 MTU 之上做分段重组，消息上限不受单帧限制
            max_msg_size: usize::MAX,
            inject_size: attrs.inline_buf_size,
            addr_len: 32,
            cq_depth: attrs.max_cq_depth,
        },
        flags,
    }
}

/// 两趟聚合：先按设备枚举顺序排全部 RDM 记录，再按同样顺序排全部
/// 数据报记录。这一顺序是对外契约。
pub struct InfoBuilder;

impl InfoBuilder {
    pub async fn build(
        devices: &[FabricDevice],
        verbs: &Arc<dyn VerbsInterface>,
    ) -> InfoResult<Vec<CapabilityInfo>> {
        let mut list = Vec::with_capacity(devices.len() * 2);

        for device in devices {
            match verbs.query_device(device).await {
                Ok(attrs) => list.push(rdm_info_for(device, &attrs)),
                Err(e) => {
                    warn!(device = %device.name, "failed to build rdm capability record: {e}");
                }
            }
        }

        for device in devices {
            match &device.dgram_info {
                Some(info) => list.push(info.clone()),
                None => {
                    warn!(device = %device.name, "no datagram capability record to duplicate");
                }
            }
        }

        if list.is_empty() {
            return Err(InfoError::NoData);
        }

        debug!(records = list.len(), "capability info list built");
        Ok(list)
    }
}
