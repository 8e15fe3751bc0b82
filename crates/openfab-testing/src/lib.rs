//! OpenFab Testing - 测试替身
//!
//! 为硬件调用点、设备枚举与垫片后端提供可注入的测试替身，使生命周期
//! 核心无需物理设备即可被确定性驱动。被测代码感知不到替身的存在。

/// 测试日志初始化；重复调用安全
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub mod device {
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use openfab_device::{
        DeviceAttrs, DeviceEnumerator, DeviceError, DeviceResult, FabricDevice, dgram_info_for,
    };

    /// 构造一块携带预查询数据报记录的测试设备
    pub fn test_device(name: &str) -> FabricDevice {
        FabricDevice {
            name: name.to_string(),
            node_guid: 0x0248_ffff_fe00_0001,
            dgram_info: Some(dgram_info_for(name, &DeviceAttrs::default())),
        }
    }

    /// 构造一块预查询失败（无数据报记录）的测试设备
    pub fn test_device_without_dgram(name: &str) -> FabricDevice {
        FabricDevice {
            name: name.to_string(),
            node_guid: 0,
            dgram_info: None,
        }
    }

    /// 设备枚举替身
    pub struct MockEnumerator {
        devices: Mutex<Vec<FabricDevice>>,
        should_fail: AtomicBool,
        release_count: AtomicUsize,
    }

    impl MockEnumerator {
        pub fn new(devices: Vec<FabricDevice>) -> Self {
            Self {
                devices: Mutex::new(devices),
                should_fail: AtomicBool::new(false),
                release_count: AtomicUsize::new(0),
            }
        }

        /// 零设备的主机
        pub fn empty() -> Self {
            Self::new(Vec::new())
        }

        /// 带 N 块全功能设备的主机
        pub fn with_devices(count: usize) -> Self {
            let devices = (0..count).map(|i| test_device(&format!("ofab_{i}"))).collect();
            Self::new(devices)
        }

        pub fn set_should_fail(&self, should_fail: bool) {
            self.should_fail.store(should_fail, Ordering::SeqCst);
        }

        pub fn release_count(&self) -> usize {
            self.release_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceEnumerator for MockEnumerator {
        async fn enumerate(&self) -> DeviceResult<Vec<FabricDevice>> {
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(DeviceError::EnumerationFailed("injected".to_string()));
            }
            Ok(self.devices.lock().unwrap().clone())
        }

        async fn release(&self) {
            self.release_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub mod shim {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use openfab_device::{ShimBackend, ShimError, ShimResult};

    /// 垫片后端的观测计数
    #[derive(Clone)]
    pub struct ShimCounters {
        pub opens: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
    }

    impl ShimCounters {
        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// 垫片后端替身
    pub struct MockShimBackend {
        fail_open: AtomicBool,
        counters: ShimCounters,
    }

    impl MockShimBackend {
        pub fn new(fail_open: bool) -> (Self, ShimCounters) {
            let counters = ShimCounters {
                opens: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            };
            let backend = Self {
                fail_open: AtomicBool::new(fail_open),
                counters: counters.clone(),
            };
            (backend, counters)
        }
    }

    impl ShimBackend for MockShimBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn open(&mut self) -> ShimResult<()> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open.load(Ordering::SeqCst) {
                Err(ShimError::LoadFailed("injected".to_string()))
            } else {
                Ok(())
            }
        }

        fn close(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub mod verbs {
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use openfab_device::{
        AddressHandle, Completion, CompletionQueue, DeviceAttrs, DeviceMemory, FabricDevice,
        RawAddress, SystemVerbs, VerbsError, VerbsInterface, VerbsResult,
    };

    /// 替身在一次测试期间积累的合成工作请求
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct WorkRequest {
        pub call: &'static str,
        pub wr_id: u64,
    }

    enum CqItem {
        Completion(Completion),
        Error(String),
    }

    /// 完成队列替身：按脚本回放完成记录，脚本耗尽后表现为空队列
    pub struct MockCompletionQueue {
        depth: usize,
        script: Mutex<VecDeque<CqItem>>,
    }

    impl MockCompletionQueue {
        /// 始终为空的队列
        pub fn empty(depth: usize) -> Self {
            Self {
                depth,
                script: Mutex::new(VecDeque::new()),
            }
        }

        pub fn with_completions(depth: usize, completions: Vec<Completion>) -> Self {
            Self {
                depth,
                script: Mutex::new(completions.into_iter().map(CqItem::Completion).collect()),
            }
        }

        /// 下一次读取返回轮询错误
        pub fn with_poll_error(depth: usize, message: &str) -> Self {
            let mut script = VecDeque::new();
            script.push_back(CqItem::Error(message.to_string()));
            Self {
                depth,
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl CompletionQueue for MockCompletionQueue {
        fn depth(&self) -> usize {
            self.depth
        }

        async fn read_one(&self) -> VerbsResult<Option<Completion>> {
            match self.script.lock().unwrap().pop_front() {
                Some(CqItem::Completion(completion)) => Ok(Some(completion)),
                Some(CqItem::Error(message)) => Err(VerbsError::Internal(anyhow!(message))),
                None => Ok(None),
            }
        }
    }

    /// 完成队列调用点的替身行为
    pub enum CqBehavior {
        Provide(Arc<dyn Fn(usize) -> Arc<dyn CompletionQueue> + Send + Sync>),
        Fail(String),
    }

    impl CqBehavior {
        /// 每次创建都得到一个空队列
        pub fn empty_queues() -> Self {
            Self::Provide(Arc::new(|depth| -> Arc<dyn CompletionQueue> {
                Arc::new(MockCompletionQueue::empty(depth))
            }))
        }
    }

    enum PointBehavior<T> {
        Succeed(T),
        Fail(String),
    }

    /// 五个硬件调用点的替身
    ///
    /// 未覆盖的调用点透传到真实实现；reset() 把所有调用点恢复为透传
    /// 并清空积累的合成工作请求。
    pub struct MockVerbs {
        base: Arc<dyn VerbsInterface>,
        ah_behavior: Mutex<Option<PointBehavior<()>>>,
        query_default: Mutex<Option<DeviceAttrs>>,
        query_attrs: Mutex<HashMap<String, DeviceAttrs>>,
        query_failures: Mutex<HashSet<String>>,
        cq_behavior: Mutex<Option<CqBehavior>>,
        dm_behavior: Mutex<Option<PointBehavior<()>>>,
        copy_behavior: Mutex<Option<PointBehavior<Vec<u8>>>>,
        work_requests: Mutex<Vec<WorkRequest>>,
        call_counts: Mutex<HashMap<&'static str, usize>>,
        next_handle: AtomicU64,
    }

    impl MockVerbs {
        pub fn new() -> Arc<Self> {
            Self::with_base(Arc::new(SystemVerbs::new()))
        }

        pub fn with_base(base: Arc<dyn VerbsInterface>) -> Arc<Self> {
            Arc::new(Self {
                base,
                ah_behavior: Mutex::new(None),
                query_default: Mutex::new(None),
                query_attrs: Mutex::new(HashMap::new()),
                query_failures: Mutex::new(HashSet::new()),
                cq_behavior: Mutex::new(None),
                dm_behavior: Mutex::new(None),
                copy_behavior: Mutex::new(None),
                work_requests: Mutex::new(Vec::new()),
                call_counts: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
            })
        }

        pub fn succeed_address_handles(&self) {
            *self.ah_behavior.lock().unwrap() = Some(PointBehavior::Succeed(()));
        }

        pub fn fail_address_handles(&self, message: &str) {
            *self.ah_behavior.lock().unwrap() = Some(PointBehavior::Fail(message.to_string()));
        }

        /// 设备查询一律返回给定属性（除非被逐设备覆盖）
        pub fn succeed_queries_with(&self, attrs: DeviceAttrs) {
            *self.query_default.lock().unwrap() = Some(attrs);
        }

        pub fn set_device_attrs(&self, device_name: &str, attrs: DeviceAttrs) {
            self.query_attrs
                .lock()
                .unwrap()
                .insert(device_name.to_string(), attrs);
        }

        pub fn fail_query_for(&self, device_name: &str) {
            self.query_failures
                .lock()
                .unwrap()
                .insert(device_name.to_string());
        }

        pub fn set_cq_behavior(&self, behavior: CqBehavior) {
            *self.cq_behavior.lock().unwrap() = Some(behavior);
        }

        pub fn succeed_device_memory(&self) {
            *self.dm_behavior.lock().unwrap() = Some(PointBehavior::Succeed(()));
        }

        pub fn fail_device_memory(&self, message: &str) {
            *self.dm_behavior.lock().unwrap() = Some(PointBehavior::Fail(message.to_string()));
        }

        pub fn set_copy_result(&self, bytes: Vec<u8>) {
            *self.copy_behavior.lock().unwrap() = Some(PointBehavior::Succeed(bytes));
        }

        /// 恢复全部调用点为透传并清空合成工作请求与计数
        pub fn reset(&self) {
            *self.ah_behavior.lock().unwrap() = None;
            *self.query_default.lock().unwrap() = None;
            self.query_attrs.lock().unwrap().clear();
            self.query_failures.lock().unwrap().clear();
            *self.cq_behavior.lock().unwrap() = None;
            *self.dm_behavior.lock().unwrap() = None;
            *self.copy_behavior.lock().unwrap() = None;
            self.work_requests.lock().unwrap().clear();
            self.call_counts.lock().unwrap().clear();
        }

        pub fn call_count(&self, call: &'static str) -> usize {
            self.call_counts.lock().unwrap().get(call).copied().unwrap_or(0)
        }

        pub fn work_requests(&self) -> Vec<WorkRequest> {
            self.work_requests.lock().unwrap().clone()
        }

        fn record_call(&self, call: &'static str) {
            *self.call_counts.lock().unwrap().entry(call).or_insert(0) += 1;
        }

        fn record_work_request(&self, call: &'static str) -> u64 {
            let wr_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
            self.work_requests
                .lock()
                .unwrap()
                .push(WorkRequest { call, wr_id });
            wr_id
        }
    }

    #[async_trait]
    impl VerbsInterface for MockVerbs {
        async fn create_address_handle(
            &self,
            device: &FabricDevice,
            addr: &RawAddress,
        ) -> VerbsResult<AddressHandle> {
            self.record_call("create_address_handle");
            {
                let behavior = self.ah_behavior.lock().unwrap();
                match &*behavior {
                    Some(PointBehavior::Succeed(())) => {
                        return Ok(AddressHandle(
                            self.record_work_request("create_address_handle"),
                        ));
                    }
                    Some(PointBehavior::Fail(message)) => {
                        return Err(VerbsError::InvalidArgument(message.clone()));
                    }
                    None => {}
                }
            }
            self.base.create_address_handle(device, addr).await
        }

        async fn query_device(&self, device: &FabricDevice) -> VerbsResult<DeviceAttrs> {
            self.record_call("query_device");
            if self.query_failures.lock().unwrap().contains(&device.name) {
                return Err(VerbsError::DeviceNotFound(device.name.clone()));
            }
            if let Some(attrs) = self.query_attrs.lock().unwrap().get(&device.name) {
                return Ok(*attrs);
            }
            if let Some(attrs) = *self.query_default.lock().unwrap() {
                return Ok(attrs);
            }
            self.base.query_device(device).await
        }

        async fn create_completion_queue(
            &self,
            device: &FabricDevice,
            depth: usize,
        ) -> VerbsResult<Arc<dyn CompletionQueue>> {
            self.record_call("create_completion_queue");
            {
                let behavior = self.cq_behavior.lock().unwrap();
                match &*behavior {
                    Some(CqBehavior::Provide(factory)) => return Ok(factory(depth)),
                    Some(CqBehavior::Fail(message)) => {
                        return Err(VerbsError::QueueCreationFailed(message.clone()));
                    }
                    None => {}
                }
            }
            self.base.create_completion_queue(device, depth).await
        }

        async fn alloc_device_memory(
            &self,
            device: &FabricDevice,
            len: usize,
        ) -> VerbsResult<DeviceMemory> {
            self.record_call("alloc_device_memory");
            {
                let behavior = self.dm_behavior.lock().unwrap();
                match &*behavior {
                    Some(PointBehavior::Succeed(())) => {
                        let handle = self.record_work_request("alloc_device_memory");
                        return Ok(DeviceMemory { handle, len });
                    }
                    Some(PointBehavior::Fail(message)) => {
                        return Err(VerbsError::AllocationFailed(message.clone()));
                    }
                    None => {}
                }
            }
            self.base.alloc_device_memory(device, len).await
        }

        async fn copy_from_device_memory(
            &self,
            mem: &DeviceMemory,
            offset: usize,
            len: usize,
        ) -> VerbsResult<Vec<u8>> {
            self.record_call("copy_from_device_memory");
            {
                let behavior = self.copy_behavior.lock().unwrap();
                match &*behavior {
                    Some(PointBehavior::Succeed(bytes)) => return Ok(bytes.clone()),
                    Some(PointBehavior::Fail(message)) => {
                        return Err(VerbsError::InvalidArgument(message.clone()));
                    }
                    None => {}
                }
            }
            self.base.copy_from_device_memory(mem, offset, len).await
        }
    }

    /// 作用域替换守卫
    ///
    /// 一次测试内替换若干调用点；守卫析构时所有调用点恢复为透传，
    /// 替身积累的合成工作请求一并清空，下一个测试面对真实实现。
    pub struct MockScope {
        verbs: Arc<MockVerbs>,
    }

    impl MockScope {
        pub fn new(verbs: &Arc<MockVerbs>) -> Self {
            Self {
                verbs: verbs.clone(),
            }
        }

        pub fn verbs(&self) -> Arc<MockVerbs> {
            self.verbs.clone()
        }
    }

    impl Drop for MockScope {
        fn drop(&mut self) {
            self.verbs.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::device::{MockEnumerator, test_device};
    use super::verbs::{CqBehavior, MockScope, MockVerbs};
    use openfab_device::{
        CompletionOp, CompletionQueue, CompletionStatus, DeviceEnumerator, VerbsInterface,
    };

    #[tokio::test]
    async fn test_mock_enumerator_failure_injection() {
        let enumerator = MockEnumerator::with_devices(2);
        assert_eq!(enumerator.enumerate().await.unwrap().len(), 2);

        enumerator.set_should_fail(true);
        assert!(enumerator.enumerate().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_verbs_records_work_requests() {
        let verbs = MockVerbs::new();
        let scope = MockScope::new(&verbs);
        verbs.succeed_address_handles();

        let device = test_device("ofab_0");
        let addr = openfab_device::RawAddress {
            gid: [0u8; 16],
            qpn: 7,
        };
        verbs.create_address_handle(&device, &addr).await.unwrap();
        verbs.create_address_handle(&device, &addr).await.unwrap();

        assert_eq!(verbs.work_requests().len(), 2);
        assert_eq!(verbs.call_count("create_address_handle"), 2);

        drop(scope);
        assert!(verbs.work_requests().is_empty());
        assert_eq!(verbs.call_count("create_address_handle"), 0);
    }

    #[test]
    fn test_scripted_completion_queue() {
        let completion = openfab_device::Completion {
            wr_id: 1,
            op: CompletionOp::Send,
            status: CompletionStatus::Success,
            byte_len: 64,
        };
        let cq = super::verbs::MockCompletionQueue::with_completions(16, vec![completion]);

        tokio_test::block_on(async {
            assert_eq!(cq.read_one().await.unwrap(), Some(completion));
            assert_eq!(cq.read_one().await.unwrap(), None);
        });
    }

    #[tokio::test]
    async fn test_cq_behavior_empty_queues_then_restores_real() {
        let verbs = MockVerbs::new();
        let scope = MockScope::new(&verbs);
        verbs.set_cq_behavior(CqBehavior::empty_queues());

        // 消费方透过被替换的调用点轮询，观察到零条完成且无错误
        let device = test_device("ofab_0");
        let cq = verbs.create_completion_queue(&device, 32).await.unwrap();
        assert_eq!(cq.depth(), 32);
        assert_eq!(cq.read_one().await.unwrap(), None);
        assert_eq!(cq.read_one().await.unwrap(), None);

        // 守卫析构后调用点透传回真实实现
        drop(scope);
        let err = verbs
            .create_completion_queue(&device, 32)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            openfab_device::VerbsError::DriverUnavailable(_)
        ));
    }
}
