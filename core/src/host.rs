use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

/// Static information about the host, handed to plugins on instantiation.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub name: Cow<'static, str>,
    pub vendor: Cow<'static, str>,
    pub version: Cow<'static, str>,
}

impl HostInfo {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        vendor: impl Into<Cow<'static, str>>,
        version: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self { name: name.into(), vendor: vendor.into(), version: version.into() }
    }
}

/// The host-callback surface a `PluginMainThread`/`PluginAudioThread` may
/// use to request services of the host (request a main-thread callback,
/// request that processing resume). Requests are flags set from any thread
/// and drained by the engine on its own schedule — never a direct call back
/// into engine state from the plugin.
#[derive(Debug, Default)]
pub struct Host {
    request_callback: AtomicBool,
    request_process: AtomicBool,
    request_restart: AtomicBool,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_callback(&self) {
        self.request_callback.store(true, Ordering::Release);
    }

    pub fn request_process(&self) {
        self.request_process.store(true, Ordering::Release);
    }

    pub fn request_restart(&self) {
        self.request_restart.store(true, Ordering::Release);
    }

    pub fn take_callback_request(&self) -> bool {
        self.request_callback.swap(false, Ordering::AcqRel)
    }

    pub fn take_process_request(&self) -> bool {
        self.request_process.swap(false, Ordering::AcqRel)
    }

    pub fn take_restart_request(&self) -> bool {
        self.request_restart.swap(false, Ordering::AcqRel)
    }
}
