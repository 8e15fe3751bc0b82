//! 提供者注册表
//!
//! 生命周期上下文持有的进程级状态：已发布的能力信息列表、活动通信
//! 域列表、共享内存旁路信息与各启动阶段标志。收尾后所有字段回到空
//! 状态，重复收尾因此是空操作。

use serde::{Deserialize, Serialize};

use openfab_core::CapabilityInfo;

use crate::rdm_env::RdmTuning;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Fabric not found: {0}")]
    FabricNotFound(String),

    #[error("Domain already exists: {0}")]
    DomainAlreadyExists(String),
}

/// 活动通信域句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainHandle {
    pub name: String,
}

/// 启动阶段标志；收尾各步骤据此自查"确实初始化过吗"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitStages {
    pub devices_enumerated: bool,
    pub shim_loaded: bool,
    pub info_built: bool,
    pub domains_ready: bool,
    pub tuning_ready: bool,
}

/// 提供者注册表
#[derive(Default)]
pub struct ProviderRegistry {
    info_list: Vec<CapabilityInfo>,
    domains: Vec<DomainHandle>,
    shm_info: Option<Vec<CapabilityInfo>>,
    tuning: Option<RdmTuning>,
    stages: InitStages,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已发布的能力信息列表；列表节点是值对象，调用方拿到的是副本
    pub fn info_list(&self) -> &[CapabilityInfo] {
        &self.info_list
    }

    pub fn install_info(&mut self, list: Vec<CapabilityInfo>) {
        self.info_list = list;
        self.stages.info_built = true;
    }

    /// 逐条释放能力信息并清空表头；返回释放的记录数
    pub fn clear_info(&mut self) -> usize {
        let freed = self.info_list.len();
        self.info_list.clear();
        self.stages.info_built = false;
        freed
    }

    pub fn init_domains(&mut self) {
        self.domains = Vec::new();
        self.stages.domains_ready = true;
    }

    /// 按域名称解析已发布记录并登记一个活动通信域
    pub fn open_domain(&mut self, name: &str) -> RegistryResult<DomainHandle> {
        if !self.info_list.iter().any(|info| info.domain_name == name) {
            return Err(RegistryError::FabricNotFound(name.to_string()));
        }
        if self.domains.iter().any(|domain| domain.name == name) {
            return Err(RegistryError::DomainAlreadyExists(name.to_string()));
        }

        let handle = DomainHandle {
            name: name.to_string(),
        };
        self.domains.push(handle.clone());
        Ok(handle)
    }

    pub fn domains(&self) -> &[DomainHandle] {
        &self.domains
    }

    pub fn install_shm_info(&mut self, info: Vec<CapabilityInfo>) {
        self.shm_info = Some(info);
    }

    pub fn take_shm_info(&mut self) -> Option<Vec<CapabilityInfo>> {
        self.shm_info.take()
    }

    pub fn install_tuning(&mut self, tuning: RdmTuning) {
        self.tuning = Some(tuning);
        self.stages.tuning_ready = true;
    }

    pub fn tuning(&self) -> Option<&RdmTuning> {
        self.tuning.as_ref()
    }

    pub fn stages(&self) -> InitStages {
        self.stages
    }

    pub fn stages_mut(&mut self) -> &mut InitStages {
        &mut self.stages
    }

    /// 所有字段都处于空状态
    pub fn is_empty(&self) -> bool {
        self.info_list.is_empty()
            && self.domains.is_empty()
            && self.shm_info.is_none()
            && self.tuning.is_none()
            && self.stages == InitStages::default()
    }

    /// 整表回到空状态
    pub fn reset(&mut self) {
        self.info_list.clear();
        self.domains.clear();
        self.shm_info = None;
        self.tuning = None;
        self.stages = InitStages::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openfab_core::{
        AddressFormat, CapabilityFlags, CapabilityInfo, EndpointStyle, SizeLimits,
    };

    fn sample_info(domain_name: &str, style: EndpointStyle) -> CapabilityInfo {
        CapabilityInfo {
            fabric_name: "openfab".to_string(),
            domain_name: domain_name.to_string(),
            endpoint_style: style,
            addr_format: AddressFormat::Raw,
            limits: SizeLimits::default(),
            flags: CapabilityFlags::dgram(),
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.info_list().is_empty());
    }

    #[test]
    fn test_install_and_clear_info() {
        let mut registry = ProviderRegistry::new();
        registry.install_info(vec![
            sample_info("ofab_0-rdm", EndpointStyle::Rdm),
            sample_info("ofab_0-dgram", EndpointStyle::Dgram),
        ]);
        assert!(registry.stages().info_built);
        assert_eq!(registry.info_list().len(), 2);

        assert_eq!(registry.clear_info(), 2);
        assert!(!registry.stages().info_built);
        assert_eq!(registry.clear_info(), 0);
    }

    #[test]
    fn test_open_domain_requires_published_info() {
        let mut registry = ProviderRegistry::new();
        registry.init_domains();

        let err = registry.open_domain("ofab_0-rdm").unwrap_err();
        assert!(matches!(err, RegistryError::FabricNotFound(_)));

        registry.install_info(vec![sample_info("ofab_0-rdm", EndpointStyle::Rdm)]);
        let handle = registry.open_domain("ofab_0-rdm").unwrap();
        assert_eq!(handle.name, "ofab_0-rdm");
        assert_eq!(registry.domains().len(), 1);

        let err = registry.open_domain("ofab_0-rdm").unwrap_err();
        assert!(matches!(err, RegistryError::DomainAlreadyExists(_)));
    }

    #[test]
    fn test_reset_returns_to_empty() {
        let mut registry = ProviderRegistry::new();
        registry.install_info(vec![sample_info("ofab_0-rdm", EndpointStyle::Rdm)]);
        registry.init_domains();
        registry.open_domain("ofab_0-rdm").unwrap();
        registry.install_shm_info(vec![sample_info("ofab_0-dgram", EndpointStyle::Dgram)]);
        registry.install_tuning(crate::rdm_env::RdmTuning::default());
        assert!(!registry.is_empty());

        registry.reset();
        assert!(registry.is_empty());

        registry.reset();
        assert!(registry.is_empty());
    }
}
