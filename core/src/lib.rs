//! Types shared between the realtime graph engine (`audiograph`) and any
//! out-of-process collaborator: a plugin host binding, or an audio/MIDI
//! driver implementing [`AudioBackend`]-shaped callbacks.
//!
//! Kept deliberately small and dependency-light so that a plugin host
//! binding crate can depend on `audiograph-core` alone without pulling in
//! the engine's scheduling machinery.

pub mod buffer;
pub mod host;
pub mod plugin;
pub mod port_type;
pub mod proc_info;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use buffer::{Buffer, EventPayload, SeqEvent};
pub use host::{Host, HostInfo};
pub use plugin::{
    Instance, PluginAudioThread, PluginDescriptor, PluginFactory, PluginMainThread,
};
pub use port_type::PortType;
pub use proc_info::{ProcBuffers, ProcInfo, ProcessStatus};
pub use time::SampleRate;
