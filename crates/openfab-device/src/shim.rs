//! 平台兼容垫片装载器
//!
//! 个别平台没有原生 verbs 集成，需要装载一个兼容动态库来提供硬件
//! 原语；其余平台装卸均为空操作。生命周期管理器只面对 load()/unload()，
//! 从不按平台分支。

use tracing::{debug, warn};

pub type ShimResult<T> = Result<T, ShimError>;

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("Shim library load failed: {0}")]
    LoadFailed(String),
}

/// 垫片装载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimState {
    NotLoaded,
    Loaded,
    LoadFailed,
}

/// 实际的装卸策略，按构建配置选定
pub trait ShimBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&mut self) -> ShimResult<()>;

    fn close(&mut self);
}

/// 垫片状态机
pub struct PlatformShim {
    state: ShimState,
    backend: Box<dyn ShimBackend>,
}

impl PlatformShim {
    pub fn new(backend: Box<dyn ShimBackend>) -> Self {
        Self {
            state: ShimState::NotLoaded,
            backend,
        }
    }

    /// 按当前构建平台选择默认策略
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        {
            Self::new(Box::new(CompatBackend::new()))
        }
        #[cfg(not(windows))]
        {
            Self::new(Box::new(NativeBackend))
        }
    }

    pub fn state(&self) -> ShimState {
        self.state
    }

    pub fn load(&mut self) -> ShimResult<()> {
        if self.state == ShimState::Loaded {
            return Ok(());
        }

        match self.backend.open() {
            Ok(()) => {
                self.state = ShimState::Loaded;
                debug!(backend = self.backend.name(), "platform shim loaded");
                Ok(())
            }
            Err(e) => {
                self.state = ShimState::LoadFailed;
                warn!(backend = self.backend.name(), "platform shim load failed: {e}");
                Err(e)
            }
        }
    }

    /// 仅在 Loaded 状态释放底层库；其余状态为空操作
    pub fn unload(&mut self) {
        if self.state != ShimState::Loaded {
            return;
        }
        self.backend.close();
        self.state = ShimState::NotLoaded;
        debug!(backend = self.backend.name(), "platform shim unloaded");
    }
}

/// 原生支持 verbs 的平台：装卸均为空操作
pub struct NativeBackend;

impl ShimBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open(&mut self) -> ShimResult<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// 经动态库提供 verbs 原语的平台
#[cfg(windows)]
pub struct CompatBackend {
    library: Option<libloading::Library>,
}

#[cfg(windows)]
impl CompatBackend {
    const LIBRARY_NAME: &'static str = "fabwin.dll";

    pub fn new() -> Self {
        Self { library: None }
    }
}

#[cfg(windows)]
impl Default for CompatBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl ShimBackend for CompatBackend {
    fn name(&self) -> &'static str {
        "compat"
    }

    fn open(&mut self) -> ShimResult<()> {
        // SAFETY: 装载厂商兼容库，符号生命周期与句柄绑定
        match unsafe { libloading::Library::new(Self::LIBRARY_NAME) } {
            Ok(library) => {
                self.library = Some(library);
                Ok(())
            }
            Err(e) => Err(ShimError::LoadFailed(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.library.take();
    }
}
