//! OpenFab Provider - 传输提供者生命周期核心
//!
//! 进程附着时枚举 fabric 设备、聚合能力信息并向宿主框架发布分发表；
//! 进程分离时按严格逆序释放全部资源，包括启动半途失败留下的部分。

pub mod dispatch;
pub mod info;
pub mod lifecycle;
pub mod rdm_env;
pub mod registry;

pub use dispatch::*;
pub use info::*;
pub use lifecycle::*;
pub use rdm_env::*;
pub use registry::*;
