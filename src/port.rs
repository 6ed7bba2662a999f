//! Typed, possibly polyphonic port endpoints (component design §4.2).

use smallvec::SmallVec;

use audiograph_core::{Buffer, PortType};

use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// The `set_scalar` pending-apply state machine (§4.2). `Ok` is the steady
/// state; a mid-period `set_scalar` with `frame_offset > 0` starts a
/// two-cycle settle so that the buffer is only ever *fully* uniform at a
/// period boundary, never mid-traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarPending {
    Ok,
    HalfSetCycle1,
    HalfSetCycle2,
}

pub struct Port {
    pub path: Path,
    pub symbol: String,
    pub index: usize,
    pub direction: Direction,
    pub port_type: PortType,
    pub poly: usize,
    pub min: f64,
    pub max: f64,

    buffers: SmallVec<[Buffer; 1]>,
    /// Private mix buffer used when an input port has more than one
    /// inbound `Connection` (§3, §4.4). Allocated off the audio thread by
    /// the PreProcessor whenever a `Connect`/`Disconnect` changes this
    /// port's inbound count, and installed here by `Executor::execute`
    /// (§4.7: the Executor itself never allocates).
    mix_buffers: Option<SmallVec<[Buffer; 1]>>,

    current_value: f64,
    pending_value: f64,
    pending_offset: usize,
    pending: ScalarPending,
}

impl Port {
    pub fn new(
        path: Path,
        symbol: String,
        index: usize,
        direction: Direction,
        port_type: PortType,
        poly: usize,
        buffer_size: usize,
        min: f64,
        max: f64,
    ) -> Self {
        let buffers = (0..poly).map(|_| new_buffer(port_type, buffer_size)).collect();
        Self {
            path,
            symbol,
            index,
            direction,
            port_type,
            poly,
            min,
            max,
            buffers,
            mix_buffers: None,
            current_value: 0.0,
            pending_value: 0.0,
            pending_offset: 0,
            pending: ScalarPending::Ok,
        }
    }

    pub fn buffer(&self, voice: usize) -> &Buffer {
        &self.buffers[voice]
    }

    pub fn buffer_mut(&mut self, voice: usize) -> &mut Buffer {
        &mut self.buffers[voice]
    }

    pub fn voices(&self) -> usize {
        self.buffers.len()
    }

    /// The buffer a reader should use for this voice: the private mix
    /// buffer if one has been allocated (multiple inbound connections),
    /// otherwise the port's own buffer.
    pub fn effective_buffer(&self, voice: usize) -> &Buffer {
        match &self.mix_buffers {
            Some(mix) => &mix[voice],
            None => &self.buffers[voice],
        }
    }

    /// Install a freshly built (already-sized) mix buffer array, computed
    /// and allocated off the audio thread. Replaces any previously
    /// installed one outright, matching the one-pointer-swap discipline
    /// the rest of the live tree is mutated under (§4.7, §9).
    pub fn install_mix_buffers(&mut self, buffers: SmallVec<[Buffer; 1]>) {
        self.mix_buffers = Some(buffers);
    }

    /// Drop this port's private mix buffer: called once the port is back
    /// down to at most one ordinary inbound `Connection`, so
    /// `effective_buffer` resumes reading the port's own (now current)
    /// buffer instead of a mix buffer nothing is writing to anymore.
    pub fn drop_mix_buffer(&mut self) {
        self.mix_buffers = None;
    }

    pub fn mix_buffer_mut(&mut self, voice: usize) -> &mut Buffer {
        &mut self.mix_buffers.as_mut().expect("mix buffer not allocated")[voice]
    }

    pub fn clear_buffers(&mut self) {
        for b in self.buffers.iter_mut() {
            b.clear();
        }
        if let Some(mix) = &mut self.mix_buffers {
            for b in mix.iter_mut() {
                b.clear();
            }
        }
    }

    /// Called once per period, before any block runs. Resolves the
    /// `set_scalar` pending-apply state machine and forwards to the
    /// underlying buffers' own `prepare()`.
    pub fn prepare(&mut self, nframes: usize) {
        match self.pending {
            ScalarPending::Ok => {}
            ScalarPending::HalfSetCycle1 => {
                for b in self.buffers.iter_mut() {
                    b.set_block(self.current_value as f32, 0, nframes);
                }
                self.pending = ScalarPending::HalfSetCycle2;
            }
            ScalarPending::HalfSetCycle2 => {
                self.pending = ScalarPending::Ok;
            }
        }

        for b in self.buffers.iter_mut() {
            b.prepare(nframes);
        }
        // Mix buffers accumulate across every inbound connection each
        // period, so (unlike a port's own buffer, which callers always
        // overwrite in full) they must start each period at silence.
        if let Some(mix) = &mut self.mix_buffers {
            for b in mix.iter_mut() {
                b.clear();
                b.prepare(nframes);
            }
        }
    }

    /// Control/Cv only: record a value to apply at `frame_offset` within
    /// the current period. Idempotent: calling with the same value twice
    /// in a row leaves the buffer identical to a single call.
    pub fn set_scalar(&mut self, value: f64, frame_offset: usize, nframes: usize) {
        debug_assert!(matches!(self.port_type, PortType::Control | PortType::Cv));

        if frame_offset == 0 {
            self.current_value = value;
            for b in self.buffers.iter_mut() {
                b.set_block(value as f32, 0, nframes);
            }
            self.pending = ScalarPending::Ok;
            return;
        }

        let prev = self.current_value;
        self.current_value = value;
        self.pending_value = value;
        self.pending_offset = frame_offset;
        for b in self.buffers.iter_mut() {
            b.set_block(prev as f32, 0, frame_offset);
            b.set_block(value as f32, frame_offset, nframes);
        }
        self.pending = ScalarPending::HalfSetCycle1;
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }
}

fn new_buffer(port_type: PortType, buffer_size: usize) -> Buffer {
    match port_type {
        PortType::Audio => Buffer::new_audio(buffer_size),
        PortType::Cv => Buffer::new_cv(buffer_size),
        PortType::Control => Buffer::new_control(),
        PortType::Sequence => Buffer::new_sequence(),
    }
}

/// Build a sized mix-buffer array for a port of the given shape, off the
/// audio thread (§4.9 `prepare()`'s allocation budget, §4.7's "the
/// Executor never allocates"). `Executor::execute` only ever installs the
/// result via [`Port::install_mix_buffers`], never builds one itself.
pub fn new_mix_buffers(port_type: PortType, poly: usize, buffer_size: usize) -> SmallVec<[Buffer; 1]> {
    (0..poly).map(|_| new_buffer(port_type, buffer_size)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_port(port_type: PortType, poly: usize) -> Port {
        Port::new(
            Path::parse("/g/p").unwrap(),
            "p".into(),
            0,
            Direction::Input,
            port_type,
            poly,
            4,
            0.0,
            1.0,
        )
    }

    #[test]
    fn set_scalar_idempotent() {
        let mut port = test_port(PortType::Control, 1);
        port.set_scalar(0.5, 0, 4);
        port.set_scalar(0.5, 0, 4);
        assert_eq!(port.current_value(), 0.5);
        assert_eq!(port.buffer(0).control_value(), 0.5);
    }

    #[test]
    fn mid_period_set_then_settles_next_prepare() {
        let mut port = test_port(PortType::Control, 1);
        port.set_scalar(0.5, 0, 4);
        port.set_scalar(0.75, 2, 4);
        assert_eq!(port.current_value(), 0.75);
        port.prepare(4);
        assert_eq!(port.buffer(0).control_value(), 0.75);
    }
}
