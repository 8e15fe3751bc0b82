//! OpenFab Device - 设备枚举与硬件调用边界
//!
//! 提供 fabric 适配器的枚举、verbs 调用点抽象与平台兼容垫片装载。

pub mod device;
pub mod shim;
pub mod verbs;

pub use device::*;
pub use shim::*;
pub use verbs::*;
