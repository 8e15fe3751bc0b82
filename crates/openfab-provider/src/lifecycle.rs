//! 提供者生命周期管理
//!
//! 多阶段启动与严格逆序收尾。任一启动阶段失败都立即对已完成的
//! 子集执行完整拆除；收尾可重复调用，也可在部分初始化状态下调用。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use openfab_device::{
    DeviceEnumerator, DeviceError, FabricDevice, PlatformShim, ShimError, ShimState,
    SysfsEnumerator, SystemVerbs, VerbsInterface,
};

use crate::info::{InfoBuilder, InfoError};
use crate::rdm_env::RdmTuning;
use crate::registry::ProviderRegistry;

pub type StartResult<T> = Result<T, StartError>;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("device enumeration failed: {0}")]
    Enumeration(#[from] DeviceError),

    #[error("platform shim load failed: {0}")]
    ShimLoad(#[from] ShimError),

    #[error("no usable capability data")]
    NoData,

    #[error("provider already active")]
    AlreadyActive,

    #[error("lifecycle already finalized")]
    AlreadyFinalized,
}

impl From<InfoError> for StartError {
    fn from(e: InfoError) -> Self {
        match e {
            InfoError::NoData => StartError::NoData,
        }
    }
}

impl From<StartError> for openfab_core::OpenFabError {
    fn from(e: StartError) -> Self {
        match e {
            StartError::Enumeration(inner) => Self::Device(inner.to_string()),
            StartError::ShimLoad(inner) => Self::Shim(inner.to_string()),
            StartError::NoData => Self::Info(e.to_string()),
            StartError::AlreadyActive | StartError::AlreadyFinalized => {
                Self::Registry(e.to_string())
            }
        }
    }
}

/// 启动结果
///
/// `Declined` 表示主机上没有可提供的设备——不是错误，只是"无可奉告"。
/// 与聚合完全失败的 `StartError::NoData` 是两个可分别观测的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Declined,
    Active,
}

/// 生命周期位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Unstarted,
    DevicesEnumerated,
    ShimLoaded,
    InfoBuilt,
    DomainsReady,
    FullyInitialized,
    Finalized,
}

/// 外部协作方的收尾挂钩
#[async_trait]
pub trait ProviderHooks: Send + Sync {
    /// 释放共享内存旁路信息
    async fn release_shm_info(&self) {}

    /// 释放设备列表持有的外部资源
    async fn release_device_list(&self) {}
}

/// 默认空挂钩
pub struct NoopHooks;

#[async_trait]
impl ProviderHooks for NoopHooks {}

/// 提供者生命周期管理器
///
/// 所有硬件触达都经注入的枚举器 / verbs 实现 / 垫片策略，测试可以
/// 整体替换而核心逻辑不变。
pub struct LifecycleManager {
    enumerator: Arc<dyn DeviceEnumerator>,
    verbs: Arc<dyn VerbsInterface>,
    hooks: Arc<dyn ProviderHooks>,
    shim: PlatformShim,
    devices: Vec<FabricDevice>,
    registry: ProviderRegistry,
    stage: LifecycleStage,
}

impl LifecycleManager {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        verbs: Arc<dyn VerbsInterface>,
        shim: PlatformShim,
        hooks: Arc<dyn ProviderHooks>,
    ) -> Self {
        Self {
            enumerator,
            verbs,
            hooks,
            shim,
            devices: Vec::new(),
            registry: ProviderRegistry::new(),
            stage: LifecycleStage::Unstarted,
        }
    }

    /// 生产装配：sysfs 枚举 + 系统 verbs + 平台默认垫片
    pub fn with_defaults() -> Self {
        let verbs: Arc<dyn VerbsInterface> = Arc::new(SystemVerbs::new());
        Self::new(
            Arc::new(SysfsEnumerator::new(verbs.clone())),
            verbs,
            PlatformShim::platform_default(),
            Arc::new(NoopHooks),
        )
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    pub fn stage(&self) -> LifecycleStage {
        self.stage
    }

    pub fn shim_state(&self) -> ShimState {
        self.shim.state()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// 多阶段启动；每个阶段以前一阶段成功为前提，失败分支一律走
    /// 完整收尾后返回
    pub async fn start(&mut self) -> StartResult<StartOutcome> {
        match self.stage {
            LifecycleStage::Unstarted => {}
            LifecycleStage::Finalized => return Err(StartError::AlreadyFinalized),
            _ => return Err(StartError::AlreadyActive),
        }

        // 阶段 1：设备枚举。枚举错误直接中止；零设备表示婉拒激活，
        // 此时垫片未被触碰，也不构建任何信息
        let devices = self.enumerator.enumerate().await?;
        if devices.is_empty() {
            info!("no fabric devices present, provider declines to activate");
            return Ok(StartOutcome::Declined);
        }
        debug!(count = devices.len(), "fabric devices enumerated");
        self.devices = devices;
        self.registry.stages_mut().devices_enumerated = true;
        self.stage = LifecycleStage::DevicesEnumerated;

        // 阶段 2：平台垫片
        if let Err(e) = self.shim.load() {
            self.unwind().await;
            return Err(StartError::ShimLoad(e));
        }
        self.registry.stages_mut().shim_loaded = true;
        self.stage = LifecycleStage::ShimLoaded;

        // 阶段 3：能力信息聚合并发布
        match InfoBuilder::build(&self.devices, &self.verbs).await {
            Ok(list) => self.registry.install_info(list),
            Err(e) => {
                self.unwind().await;
                return Err(e.into());
            }
        }
        self.stage = LifecycleStage::InfoBuilt;

        // 阶段 4：活动通信域列表（不会失败）
        self.registry.init_domains();
        self.stage = LifecycleStage::DomainsReady;

        // 阶段 5：RDM 子系统环境调优（不会失败）
        self.registry.install_tuning(RdmTuning::from_env());
        self.stage = LifecycleStage::FullyInitialized;

        info!(
            records = self.registry.info_list().len(),
            "provider initialized"
        );
        Ok(StartOutcome::Active)
    }

    /// 启动失败时的回退：对已完成的子集执行完整收尾
    async fn unwind(&mut self) {
        warn!(stage = ?self.stage, "startup failed, unwinding");
        self.teardown().await;
    }

    /// 收尾；幂等，且从不向调用方报告失败
    pub async fn stop(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        // 严格逆依赖顺序，每步自查"确实初始化过吗"再释放

        let freed = self.registry.clear_info();
        if freed > 0 {
            debug!(records = freed, "capability info list released");
        }

        if self.registry.take_shm_info().is_some() {
            self.hooks.release_shm_info().await;
            debug!("shared-memory side info released");
        }

        if !self.devices.is_empty() {
            self.hooks.release_device_list().await;
            self.enumerator.release().await;
            self.devices.clear();
            debug!("device list released");
        }

        // 垫片自带状态机，未装载时这里是空操作
        self.shim.unload();

        self.registry.reset();
        self.stage = LifecycleStage::Finalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use openfab_core::EndpointStyle;
    use openfab_device::DeviceAttrs;
    use openfab_testing::device::{MockEnumerator, test_device, test_device_without_dgram};
    use openfab_testing::shim::{MockShimBackend, ShimCounters};
    use openfab_testing::verbs::{MockScope, MockVerbs};

    struct RecordingHooks {
        shm_released: AtomicUsize,
        devices_released: AtomicUsize,
    }

    impl RecordingHooks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                shm_released: AtomicUsize::new(0),
                devices_released: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProviderHooks for RecordingHooks {
        async fn release_shm_info(&self) {
            self.shm_released.fetch_add(1, Ordering::SeqCst);
        }

        async fn release_device_list(&self) {
            self.devices_released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        manager: LifecycleManager,
        verbs: Arc<MockVerbs>,
        enumerator: Arc<MockEnumerator>,
        shim_counters: ShimCounters,
        hooks: Arc<RecordingHooks>,
    }

    fn harness(enumerator: MockEnumerator, fail_shim: bool) -> Harness {
        openfab_testing::init_tracing();

        let verbs = MockVerbs::new();
        let enumerator = Arc::new(enumerator);
        let hooks = RecordingHooks::new();
        let (backend, shim_counters) = MockShimBackend::new(fail_shim);
        let manager = LifecycleManager::new(
            enumerator.clone(),
            verbs.clone(),
            PlatformShim::new(Box::new(backend)),
            hooks.clone(),
        );
        Harness {
            manager,
            verbs,
            enumerator,
            shim_counters,
            hooks,
        }
    }

    #[tokio::test]
    async fn test_zero_devices_declines_without_side_effects() {
        let mut h = harness(MockEnumerator::empty(), false);
        let _scope = MockScope::new(&h.verbs);

        let outcome = h.manager.start().await.unwrap();
        assert_eq!(outcome, StartOutcome::Declined);
        assert_eq!(h.shim_counters.opens(), 0);
        assert_eq!(h.verbs.call_count("query_device"), 0);
        assert!(h.manager.registry().is_empty());

        // 婉拒之后的收尾同样是安全的空操作
        h.manager.stop().await;
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.shim_counters.closes(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts() {
        let enumerator = MockEnumerator::with_devices(1);
        enumerator.set_should_fail(true);
        let mut h = harness(enumerator, false);
        let _scope = MockScope::new(&h.verbs);

        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, StartError::Enumeration(_)));
        assert_eq!(h.shim_counters.opens(), 0);
        assert!(h.manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shim_failure_unwinds_and_skips_unload() {
        let mut h = harness(MockEnumerator::with_devices(2), true);
        let scope = MockScope::new(&h.verbs);
        h.verbs.succeed_queries_with(DeviceAttrs::default());

        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, StartError::ShimLoad(_)));

        // 信息聚合从未被尝试，卸载也被跳过
        assert_eq!(h.verbs.call_count("query_device"), 0);
        assert_eq!(h.shim_counters.opens(), 1);
        assert_eq!(h.shim_counters.closes(), 0);

        // 回退已经释放了设备列表
        assert_eq!(h.hooks.devices_released.load(Ordering::SeqCst), 1);
        assert_eq!(h.enumerator.release_count(), 1);
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.manager.stage(), LifecycleStage::Finalized);
        drop(scope);
    }

    #[tokio::test]
    async fn test_total_aggregation_failure_is_no_data() {
        let enumerator = MockEnumerator::new(vec![
            test_device_without_dgram("ofab_0"),
            test_device_without_dgram("ofab_1"),
        ]);
        let mut h = harness(enumerator, false);
        let _scope = MockScope::new(&h.verbs);
        h.verbs.fail_query_for("ofab_0");
        h.verbs.fail_query_for("ofab_1");

        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, StartError::NoData));

        // 垫片已装载过，回退时应当卸载
        assert_eq!(h.shim_counters.opens(), 1);
        assert_eq!(h.shim_counters.closes(), 1);
        assert!(h.manager.registry().is_empty());

        // 没有任何遗留时再次收尾仍是安全的
        h.manager.stop().await;
        assert!(h.manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_devices() {
        let enumerator = MockEnumerator::new(vec![
            test_device("ofab_0"),
            test_device("ofab_1"),
            test_device("ofab_2"),
        ]);
        let mut h = harness(enumerator, false);
        let _scope = MockScope::new(&h.verbs);
        h.verbs.succeed_queries_with(DeviceAttrs::default());
        h.verbs.fail_query_for("ofab_1");

        let outcome = h.manager.start().await.unwrap();
        assert_eq!(outcome, StartOutcome::Active);

        let list = h.manager.registry().info_list();
        let rdm_count = list.iter().filter(|i| i.is_rdm()).count();
        let dgram_count = list.iter().filter(|i| i.is_dgram()).count();
        assert_eq!(rdm_count, 2);
        assert_eq!(dgram_count, 3);
    }

    #[tokio::test]
    async fn test_full_startup_and_teardown() {
        let mut h = harness(MockEnumerator::with_devices(3), false);
        let _scope = MockScope::new(&h.verbs);
        h.verbs.succeed_queries_with(DeviceAttrs::default());

        let outcome = h.manager.start().await.unwrap();
        assert_eq!(outcome, StartOutcome::Active);
        assert_eq!(h.manager.stage(), LifecycleStage::FullyInitialized);

        let list = h.manager.registry().info_list();
        assert_eq!(list.len(), 6);
        let expected = [
            (EndpointStyle::Rdm, "ofab_0-rdm"),
            (EndpointStyle::Rdm, "ofab_1-rdm"),
            (EndpointStyle::Rdm, "ofab_2-rdm"),
            (EndpointStyle::Dgram, "ofab_0-dgram"),
            (EndpointStyle::Dgram, "ofab_1-dgram"),
            (EndpointStyle::Dgram, "ofab_2-dgram"),
        ];
        for (info, (style, domain)) in list.iter().zip(expected) {
            assert_eq!(info.endpoint_style, style);
            assert_eq!(info.domain_name, domain);
        }
        assert!(h.manager.registry().stages().domains_ready);
        assert!(h.manager.registry().tuning().is_some());
        assert_eq!(h.manager.shim_state(), ShimState::Loaded);

        h.manager.stop().await;
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.manager.device_count(), 0);
        assert_eq!(h.manager.shim_state(), ShimState::NotLoaded);
        assert_eq!(h.shim_counters.closes(), 1);
        assert_eq!(h.hooks.devices_released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut h = harness(MockEnumerator::with_devices(2), false);
        let _scope = MockScope::new(&h.verbs);
        h.verbs.succeed_queries_with(DeviceAttrs::default());

        h.manager.start().await.unwrap();
        h.manager.registry_mut().install_shm_info(Vec::new());

        h.manager.stop().await;
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.hooks.shm_released.load(Ordering::SeqCst), 1);
        let closes_after_first = h.shim_counters.closes();

        h.manager.stop().await;
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.hooks.shm_released.load(Ordering::SeqCst), 1);
        assert_eq!(h.hooks.devices_released.load(Ordering::SeqCst), 1);
        assert_eq!(h.shim_counters.closes(), closes_after_first);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut h = harness(MockEnumerator::with_devices(1), false);
        let _scope = MockScope::new(&h.verbs);
        h.verbs.succeed_queries_with(DeviceAttrs::default());

        h.manager.start().await.unwrap();
        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyActive));

        h.manager.stop().await;
        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, StartError::AlreadyFinalized));
    }
}
