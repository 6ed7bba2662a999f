//! The `Plugin`/`Instance` collaborator contract (external interfaces §6).
//!
//! This crate never loads plugin binaries itself — that is the plugin host
//! binding's job. What lives here is the narrow trait surface the engine
//! needs in order to drive an already-loaded plugin through its lifecycle
//! and per-period `process()` calls.

use std::borrow::Cow;
use std::error::Error;

use basedrop::Shared;

use crate::host::{Host, HostInfo};
use crate::port_type::PortType;
use crate::proc_info::{ProcBuffers, ProcInfo, ProcessStatus};

/// Static description of a port on a plugin's main/audio-port layout,
/// reported once at activation time (spec.md §6: "Metadata: list of ports
/// with (symbol, index, direction, type, default value, min, max)").
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub symbol: Cow<'static, str>,
    pub index: usize,
    pub is_input: bool,
    pub port_type: PortType,
    pub default_value: f64,
    pub min_value: f64,
    pub max_value: f64,
}

/// Identifying metadata for a plugin, reported by a `PluginFactory`.
pub struct PluginDescriptor<'a> {
    /// The unique reverse-domain-name identifier of this plugin.
    pub id: Cow<'a, str>,
    pub name: Cow<'a, str>,
    pub vendor: Cow<'a, str>,
    pub version: Cow<'a, str>,
    pub description: Cow<'a, str>,
}

/// Creates new instances of one kind of plugin.
///
/// `[main-thread]`
pub trait PluginFactory {
    fn description(&self) -> PluginDescriptor<'_>;

    /// Instantiate the plugin. This may allocate, open files, etc — it is
    /// never called from the audio thread.
    fn instantiate(
        &self,
        host_info: Shared<HostInfo>,
        coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginMainThread>, Box<dyn Error>>;
}

/// The methods of a plugin instance that run on the main (PreProcessor)
/// thread: everything that may allocate or block.
///
/// `Send` because a freshly built `Instance` travels from the thread that
/// calls `activate()` to whichever thread is driving the `Executor` over
/// the `PreparedEvent` ring (§4.8) before this half is ever touched again.
pub trait PluginMainThread: Send {
    /// Called once after instantiation, before any other method.
    ///
    /// `[main-thread & !active]`
    #[allow(unused_variables)]
    fn init(&mut self, host: &Host, coll_handle: &basedrop::Handle) {}

    /// Activate the plugin for a given sample rate and frame-count range,
    /// producing its audio-thread counterpart. Once activated, port layout
    /// and latency must remain constant until `deactivate`.
    ///
    /// `[main-thread & !active]`
    fn activate(
        &mut self,
        sample_rate: f64,
        min_frames: usize,
        max_frames: usize,
        host: &Host,
        coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginAudioThread>, Box<dyn Error>>;

    /// Deactivate the plugin. The `PluginAudioThread` half has already been
    /// (or will shortly be) dropped by the Reclaimer.
    ///
    /// `[main-thread & active]`
    fn deactivate(&mut self, host: &Host);

    /// Called in response to a previous `Host::request_callback()`.
    ///
    /// `[main-thread]`
    #[allow(unused_variables)]
    fn on_main_thread(&mut self, host: &Host) {}

    /// The plugin's port layout. Only called while inactive.
    ///
    /// `[main-thread & !active]`
    fn ports(&self) -> Vec<PortInfo>;
}

/// The methods of a plugin instance that run on the audio (Executor)
/// thread: everything that must be realtime-safe.
pub trait PluginAudioThread: Send + 'static {
    /// Called once before any `process()` call in a run of consecutive
    /// periods. Return `Err` to decline processing this period (the
    /// Executor will not call `process()`).
    ///
    /// `[audio-thread & active & !processing]`
    #[allow(unused_variables)]
    fn start_processing(&mut self) -> Result<(), ()> {
        Ok(())
    }

    /// Called once after the last `process()` call in a run.
    ///
    /// `[audio-thread & active & processing]`
    fn stop_processing(&mut self) {}

    /// Process one period's worth of audio and events.
    ///
    /// `[audio-thread & active & processing]`
    fn process(&mut self, proc: &ProcInfo, buffers: &mut ProcBuffers, host: &Host) -> ProcessStatus;
}

/// A live instantiation of a plugin: the pairing of its main-thread and
/// audio-thread halves, as returned by a successful `activate()`.
pub struct Instance {
    pub main_thread: Box<dyn PluginMainThread>,
    pub audio_thread: Option<Box<dyn PluginAudioThread>>,
}
