//! A minimal `PluginFactory`/`Instance` pair used by this workspace's own
//! tests and by `demos/test-host`: a single mono audio input copied
//! straight to a single mono audio output, with no state and no latency.
//!
//! Kept in `audiograph-core` rather than the engine crate so both the
//! engine's own `tests/` and a host binding's tests can instantiate it
//! without depending on `audiograph` itself.

use std::borrow::Cow;
use std::error::Error;

use basedrop::Shared;

use crate::host::{Host, HostInfo};
use crate::plugin::{PluginAudioThread, PluginDescriptor, PluginFactory, PluginMainThread, PortInfo};
use crate::port_type::PortType;
use crate::proc_info::{ProcBuffers, ProcInfo, ProcessStatus};

/// Instantiates [`PassThroughMainThread`]. `id()` is always
/// `"test.passthrough"`.
pub struct PassThroughFactory;

impl PluginFactory for PassThroughFactory {
    fn description(&self) -> PluginDescriptor<'_> {
        PluginDescriptor {
            id: Cow::Borrowed("test.passthrough"),
            name: Cow::Borrowed("Pass-through"),
            vendor: Cow::Borrowed("test fixture"),
            version: Cow::Borrowed("0.1.0"),
            description: Cow::Borrowed("copies its one audio input to its one audio output"),
        }
    }

    fn instantiate(
        &self,
        _host_info: Shared<HostInfo>,
        _coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginMainThread>, Box<dyn Error>> {
        Ok(Box::new(PassThroughMainThread))
    }
}

pub struct PassThroughMainThread;

impl PluginMainThread for PassThroughMainThread {
    fn activate(
        &mut self,
        _sample_rate: f64,
        _min_frames: usize,
        _max_frames: usize,
        _host: &Host,
        _coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginAudioThread>, Box<dyn Error>> {
        Ok(Box::new(PassThroughAudioThread))
    }

    fn deactivate(&mut self, _host: &Host) {}

    fn ports(&self) -> Vec<PortInfo> {
        vec![
            PortInfo {
                symbol: Cow::Borrowed("in"),
                index: 0,
                is_input: true,
                port_type: PortType::Audio,
                default_value: 0.0,
                min_value: f64::NEG_INFINITY,
                max_value: f64::INFINITY,
            },
            PortInfo {
                symbol: Cow::Borrowed("out"),
                index: 0,
                is_input: false,
                port_type: PortType::Audio,
                default_value: 0.0,
                min_value: f64::NEG_INFINITY,
                max_value: f64::INFINITY,
            },
        ]
    }
}

pub struct PassThroughAudioThread;

impl PluginAudioThread for PassThroughAudioThread {
    fn process(&mut self, proc: &ProcInfo, buffers: &mut ProcBuffers, _host: &Host) -> ProcessStatus {
        let nframes = proc.frames;
        if let (Some(input), Some(output)) = (buffers.audio_in.first(), buffers.audio_out.first_mut()) {
            output.as_audio_mut()[..nframes].copy_from_slice(&input.as_audio()[..nframes]);
        } else {
            buffers.clear_all_outputs(proc);
        }
        ProcessStatus::Continue
    }
}

/// Instantiates [`ConstantMainThread`], one audio output that fills every
/// frame with a fixed value: `CreateBlock` calls `PluginFactory::instantiate`
/// once per voice in order (§4.3 "Polyphony policy"), so this factory hands
/// out successive constants `1.0, 2.0, 3.0, ...` across a single block's
/// voices — exactly what a test for per-voice polyphonic routing (§8
/// scenario 5) needs without the engine itself knowing a voice index.
/// `id()` is always `"test.constant"`.
#[derive(Default)]
pub struct ConstantPerVoiceFactory {
    next_value: std::sync::atomic::AtomicU32,
}

impl ConstantPerVoiceFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PluginFactory for ConstantPerVoiceFactory {
    fn description(&self) -> PluginDescriptor<'_> {
        PluginDescriptor {
            id: Cow::Borrowed("test.constant"),
            name: Cow::Borrowed("Per-voice constant"),
            vendor: Cow::Borrowed("test fixture"),
            version: Cow::Borrowed("0.1.0"),
            description: Cow::Borrowed("fills its one audio output with a fixed value, incrementing once per voice instantiated"),
        }
    }

    fn instantiate(
        &self,
        _host_info: Shared<HostInfo>,
        _coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginMainThread>, Box<dyn Error>> {
        let value = 1.0 + self.next_value.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as f32;
        Ok(Box::new(ConstantMainThread { value }))
    }
}

pub struct ConstantMainThread {
    value: f32,
}

impl PluginMainThread for ConstantMainThread {
    fn activate(
        &mut self,
        _sample_rate: f64,
        _min_frames: usize,
        _max_frames: usize,
        _host: &Host,
        _coll_handle: &basedrop::Handle,
    ) -> Result<Box<dyn PluginAudioThread>, Box<dyn Error>> {
        Ok(Box::new(ConstantAudioThread { value: self.value }))
    }

    fn deactivate(&mut self, _host: &Host) {}

    fn ports(&self) -> Vec<PortInfo> {
        vec![PortInfo {
            symbol: Cow::Borrowed("out"),
            index: 0,
            is_input: false,
            port_type: PortType::Audio,
            default_value: 0.0,
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
        }]
    }
}

pub struct ConstantAudioThread {
    value: f32,
}

impl PluginAudioThread for ConstantAudioThread {
    fn process(&mut self, proc: &ProcInfo, buffers: &mut ProcBuffers, _host: &Host) -> ProcessStatus {
        if let Some(output) = buffers.audio_out.first_mut() {
            output.set_block(self.value, 0, proc.frames);
        }
        ProcessStatus::Continue
    }
}
