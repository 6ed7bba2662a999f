//! Engine activation settings (SPEC_FULL.md §2 ambient stack), grounded on
//! the teacher's `ActivateEngineSettings`: a plain struct with a `Default`
//! impl, constructed by the embedder. No config-file parsing lives here —
//! out of scope per spec.md §1.

use audiograph_core::SampleRate;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub sample_rate: SampleRate,
    pub min_frames: usize,
    pub max_frames: usize,
    pub num_audio_in_channels: u16,
    pub num_audio_out_channels: u16,

    /// Fixed capacity of the PreProcessor→Executor EventQueue and the
    /// Executor→PostProcessor outbox (§4.8, §4.10).
    pub event_queue_capacity: usize,
    /// Bounded retry count before the PreProcessor reports back-pressure
    /// to the originating client (§4.9 step 4).
    pub enqueue_retry_limit: usize,
    /// Divisor for the per-period event cap: at most `nframes /
    /// min_event_frames` events are drained per period (§4.7 step 1).
    /// Tunable rather than a compile-time constant, per DESIGN.md's
    /// resolution of spec.md's Open Question #2.
    pub min_event_frames: usize,
    /// Frames added to the AudioBackend's current frame when stamping a
    /// freshly prepared event's target delivery time (§4.9 step 3).
    pub delivery_margin_frames: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::default(),
            min_frames: 1,
            max_frames: 2048,
            num_audio_in_channels: 2,
            num_audio_out_channels: 2,
            event_queue_capacity: 256,
            enqueue_retry_limit: 64,
            min_event_frames: 100,
            delivery_margin_frames: 64,
        }
    }
}
