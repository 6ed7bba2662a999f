use crate::buffer::Buffer;
use smallvec::SmallVec;

/// Per-period context handed to a plugin's `process()` call.
#[derive(Debug, Clone, Copy)]
pub struct ProcInfo {
    /// Number of frames to process this call. Always within the
    /// `[min_frames, max_frames]` range negotiated at activation.
    pub frames: usize,

    /// The host's wall-clock frame counter at the start of this period.
    pub steady_time: u64,
}

/// The audio and event buffers a `Block`'s `Instance`s read and write
/// during a `process()` call, one slice of [`Buffer`]s per port, in port
/// order (inputs then outputs, matching the `Block`'s port list).
pub struct ProcBuffers<'a> {
    pub audio_in: SmallVec<[&'a Buffer; 4]>,
    pub audio_out: SmallVec<[&'a mut Buffer; 4]>,
    pub event_in: SmallVec<[&'a Buffer; 2]>,
    pub event_out: SmallVec<[&'a mut Buffer; 2]>,
}

impl<'a> ProcBuffers<'a> {
    pub fn clear_all_outputs(&mut self, proc_info: &ProcInfo) {
        for buf in self.audio_out.iter_mut() {
            buf.set_block(0.0, 0, proc_info.frames);
        }
        for buf in self.event_out.iter_mut() {
            buf.clear();
        }
    }

    pub fn audio_inputs_silent(&self) -> bool {
        self.audio_in.iter().all(|b| b.is_silent())
    }
}

/// What a plugin's `process()` call returned, mirroring CLAP/LV2-style
/// process status codes that downstream hosts commonly expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The plugin has no tail and produced silence; it is safe to skip
    /// calling `process()` again until there is new input.
    Sleep,
    /// Continue calling `process()` even if inputs go silent (the plugin
    /// has an infinite tail, e.g. a drone oscillator).
    Continue,
    /// Continue calling `process()` only while inputs are non-silent.
    ContinueIfNotQuiet,
    /// The plugin is winding down a finite tail.
    Tail,
    /// The plugin failed to process this period; outputs should be
    /// discarded.
    Error,
}
