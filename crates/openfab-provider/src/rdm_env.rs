//! RDM 子系统的环境调优
//!
//! 读取进程环境得到可靠投递子系统的调优参数。读取视为不可失败：
//! 变量缺失或解析不了时回退默认值并告警。

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ENV_PREFIX: &str = "OPENFAB_RDM_";

/// 可靠投递子系统的调优状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdmTuning {
    /// 接收窗口大小（消息条数）
    pub recvwin_size: usize,
    /// 发送队列深度；0 表示沿用设备上限
    pub tx_queue_size: usize,
    /// 接收队列深度；0 表示沿用设备上限
    pub rx_queue_size: usize,
    /// 单端点保留的最小发送额度
    pub tx_min_credits: usize,
    /// 完成队列深度
    pub cq_size: usize,
    /// 经设备内存拷贝的最大尺寸
    pub max_memcpy_size: usize,
    /// 跨节点中等消息协议的起始阈值
    pub inter_min_medium_message_size: usize,
    /// 是否启用同节点共享内存传输
    pub shm_transfer_enabled: bool,
}

impl Default for RdmTuning {
    fn default() -> Self {
        Self {
            recvwin_size: 16384,
            tx_queue_size: 0,
            rx_queue_size: 0,
            tx_min_credits: 32,
            cq_size: 8192,
            max_memcpy_size: 4096,
            inter_min_medium_message_size: 256,
            shm_transfer_enabled: true,
        }
    }
}

impl RdmTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tuning = Self {
            recvwin_size: read_usize("RECVWIN_SIZE", defaults.recvwin_size),
            tx_queue_size: read_usize("TX_QUEUE_SIZE", defaults.tx_queue_size),
            rx_queue_size: read_usize("RX_QUEUE_SIZE", defaults.rx_queue_size),
            tx_min_credits: read_usize("TX_MIN_CREDITS", defaults.tx_min_credits),
            cq_size: read_usize("CQ_SIZE", defaults.cq_size),
            max_memcpy_size: read_usize("MAX_MEMCPY_SIZE", defaults.max_memcpy_size),
            inter_min_medium_message_size: read_usize(
                "INTER_MIN_MEDIUM_MESSAGE_SIZE",
                defaults.inter_min_medium_message_size,
            ),
            shm_transfer_enabled: read_bool(
                "ENABLE_SHM_TRANSFER",
                defaults.shm_transfer_enabled,
            ),
        };
        debug!(?tuning, "rdm tuning state initialized");
        tuning
    }
}

fn read_usize(key: &str, default: usize) -> usize {
    let var = format!("{ENV_PREFIX}{key}");
    match std::env::var(&var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(%var, %raw, "unparsable tuning value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn read_bool(key: &str, default: bool) -> bool {
    let var = format!("{ENV_PREFIX}{key}");
    match std::env::var(&var) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 每个测试只触碰自己独占的环境变量，断言也只看对应字段，
    // 以免并行测试互相干扰

    #[test]
    fn test_defaults_without_env() {
        let tuning = RdmTuning::from_env();
        assert_eq!(tuning.tx_min_credits, 32);
        assert_eq!(tuning.max_memcpy_size, 4096);
    }

    #[test]
    fn test_env_value_is_parsed() {
        unsafe { std::env::set_var("OPENFAB_RDM_RECVWIN_SIZE", "65536") };
        let tuning = RdmTuning::from_env();
        assert_eq!(tuning.recvwin_size, 65536);
        unsafe { std::env::remove_var("OPENFAB_RDM_RECVWIN_SIZE") };
    }

    #[test]
    fn test_garbage_value_falls_back_to_default() {
        unsafe { std::env::set_var("OPENFAB_RDM_CQ_SIZE", "banana") };
        let tuning = RdmTuning::from_env();
        assert_eq!(tuning.cq_size, RdmTuning::default().cq_size);
        unsafe { std::env::remove_var("OPENFAB_RDM_CQ_SIZE") };
    }

    #[test]
    fn test_bool_value_is_parsed() {
        unsafe { std::env::set_var("OPENFAB_RDM_ENABLE_SHM_TRANSFER", "0") };
        let tuning = RdmTuning::from_env();
        assert!(!tuning.shm_transfer_enabled);
        unsafe { std::env::remove_var("OPENFAB_RDM_ENABLE_SHM_TRANSFER") };
    }
}
