//! The `AudioBackend` collaborator contract (external interfaces §6): a
//! JACK-like audio/MIDI driver the core treats as an opaque, externally
//! owned callback source. This crate never talks to ALSA/CoreAudio/JACK
//! itself — binding one of those is the embedder's job, same as
//! `audiograph-core::plugin`'s host-binding boundary.

use audiograph_core::Buffer;

/// Per-period data the backend hands the `Executor` and takes back (§4.7
/// steps 2 and 4): one `Buffer` per external root-graph port, in port
/// order.
pub trait AudioBackend {
    fn sample_rate(&self) -> u32;
    fn block_length(&self) -> u32;
    /// Monotonic frame counter at the start of the period currently being
    /// processed, or (outside a callback) the next period about to start.
    fn current_frame(&self) -> u64;

    fn inputs(&self) -> &[Buffer];
    fn outputs(&mut self) -> &mut [Buffer];
}

#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    //! A minimal in-memory `AudioBackend` used by this crate's own tests
    //! and by `demos/test-host`.

    use super::*;

    pub struct FakeAudioBackend {
        sample_rate: u32,
        block_length: u32,
        current_frame: u64,
        inputs: Vec<Buffer>,
        outputs: Vec<Buffer>,
    }

    impl FakeAudioBackend {
        pub fn new(sample_rate: u32, block_length: u32, n_in: usize, n_out: usize) -> Self {
            Self {
                sample_rate,
                block_length,
                current_frame: 0,
                inputs: (0..n_in).map(|_| Buffer::new_audio(block_length as usize)).collect(),
                outputs: (0..n_out).map(|_| Buffer::new_audio(block_length as usize)).collect(),
            }
        }

        pub fn set_input(&mut self, index: usize, samples: &[f32]) {
            self.inputs[index].as_audio_mut()[..samples.len()].copy_from_slice(samples);
        }

        pub fn output(&self, index: usize) -> &[f32] {
            self.outputs[index].as_audio()
        }

        pub fn advance(&mut self, nframes: u64) {
            self.current_frame += nframes;
        }
    }

    impl AudioBackend for FakeAudioBackend {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
        fn block_length(&self) -> u32 {
            self.block_length
        }
        fn current_frame(&self) -> u64 {
            self.current_frame
        }
        fn inputs(&self) -> &[Buffer] {
            &self.inputs
        }
        fn outputs(&mut self) -> &mut [Buffer] {
            &mut self.outputs
        }
    }
}
