//! 宿主框架分发表与注册边界
//!
//! 固定形状的分发记录背后持有唯一的生命周期上下文；分发表没有
//! 用户数据指针，单实例约束由注册入口的进程级守卫保证。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use openfab_core::{
    CapabilityInfo, EndpointStyle, FABRIC_API_VERSION, PROVIDER_NAME, PROVIDER_VERSION, Version,
};

use crate::lifecycle::{LifecycleManager, StartError, StartOutcome, StartResult};
use crate::registry::{DomainHandle, RegistryResult};

/// 进程内同一时刻至多一个活动提供者
static PROVIDER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// 宿主框架可见的分发表
pub struct ProviderDispatch {
    pub name: &'static str,
    pub version: Version,
    pub fabric_version: Version,
    manager: Arc<RwLock<LifecycleManager>>,
    /// 该实例是否持有进程级守卫（仅经注册入口创建时为真）
    guarded: bool,
}

impl ProviderDispatch {
    fn new(manager: LifecycleManager, guarded: bool) -> Self {
        Self {
            name: PROVIDER_NAME,
            version: PROVIDER_VERSION,
            fabric_version: FABRIC_API_VERSION,
            manager: Arc::new(RwLock::new(manager)),
            guarded,
        }
    }

    /// 查询已发布的能力信息
    ///
    /// 返回记录副本；调用方不能原地修改已发布列表
    pub async fn getinfo(&self, style: Option<EndpointStyle>) -> Vec<CapabilityInfo> {
        let manager = self.manager.read().await;
        manager
            .registry()
            .info_list()
            .iter()
            .filter(|info| style.is_none_or(|s| info.endpoint_style == s))
            .cloned()
            .collect()
    }

    /// 打开 fabric：按域名称解析已发布记录并登记一个活动通信域
    pub async fn open_fabric(&self, domain_name: &str) -> RegistryResult<DomainHandle> {
        let mut manager = self.manager.write().await;
        manager.registry_mut().open_domain(domain_name)
    }

    /// 宿主框架在进程分离时调用，触发完整收尾
    ///
    /// 收尾本身幂等，重复调用同样安全
    pub async fn cleanup(&self) {
        let mut manager = self.manager.write().await;
        manager.stop().await;
        if self.guarded {
            PROVIDER_ACTIVE.store(false, Ordering::SeqCst);
        }
        info!("provider finalized");
    }
}

/// 注册入口：宿主装载器在进程附着时调用
///
/// 三个可分别观测的结果：`Ok(Some(_))` 提供者激活；`Ok(None)` 主机
/// 无可提供的设备（婉拒，不是错误）；`Err(_)` 某个启动阶段失败，
/// 其中聚合完全失败表现为 `StartError::NoData`。
pub async fn register_provider(
    mut manager: LifecycleManager,
) -> StartResult<Option<ProviderDispatch>> {
    if PROVIDER_ACTIVE.swap(true, Ordering::SeqCst) {
        return Err(StartError::AlreadyActive);
    }

    match manager.start().await {
        Ok(StartOutcome::Active) => {
            info!(
                provider = PROVIDER_NAME,
                version = %PROVIDER_VERSION,
                "provider registered"
            );
            Ok(Some(ProviderDispatch::new(manager, true)))
        }
        Ok(StartOutcome::Declined) => {
            PROVIDER_ACTIVE.store(false, Ordering::SeqCst);
            Ok(None)
        }
        Err(e) => {
            PROVIDER_ACTIVE.store(false, Ordering::SeqCst);
            Err(e)
        }
    }
}

/// 零配置注册：生产装配（sysfs 枚举 + 系统 verbs + 平台默认垫片）
pub async fn register_default_provider() -> openfab_core::Result<Option<ProviderDispatch>> {
    register_provider(LifecycleManager::with_defaults())
        .await
        .map_err(openfab_core::OpenFabError::from)
}
