//! The typed, fixed-capacity [`Buffer`] contract (data model §4.1).
//!
//! A `Buffer` is total: every operation is defined for every buffer of the
//! matching type, and misuse (wrong type, out-of-range frames) is a logic
//! error rather than something the buffer itself reports. Buffers never
//! grow or shrink after construction — sizing happens once, off the audio
//! thread, in `Buffer::new_*`.

use smallvec::SmallVec;

/// One event in a `Sequence` buffer: an offset within the current period
/// plus a payload. The payload shape is deliberately coarse — decoding a
/// real wire format (MIDI, CLAP, LV2 atoms) is the plugin host binding's
/// job, not this crate's.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeqEvent {
    pub frame_offset: u32,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload {
    NoteOn { key: i16, channel: i16, velocity: f64 },
    NoteOff { key: i16, channel: i16, velocity: f64 },
    NoteChoke { key: i16, channel: i16 },
    Midi([u8; 3]),
    Param { param_id: u32, value: f64 },
    Trigger,
}

#[derive(Debug, Clone)]
enum BufferData {
    Audio(Vec<f32>),
    Control(f32),
    Cv(Vec<f32>),
    Sequence(SmallVec<[SeqEvent; 16]>),
}

/// A typed, fixed-capacity audio or event buffer owned by exactly one
/// `Port` (or, for mix buffers, by a `Connection`).
#[derive(Debug, Clone)]
pub struct Buffer {
    data: BufferData,
    capacity: usize,
}

impl Buffer {
    pub fn new_audio(capacity: usize) -> Self {
        Self { data: BufferData::Audio(vec![0.0; capacity]), capacity }
    }

    pub fn new_control() -> Self {
        Self { data: BufferData::Control(0.0), capacity: 1 }
    }

    pub fn new_cv(capacity: usize) -> Self {
        Self { data: BufferData::Cv(vec![0.0; capacity]), capacity }
    }

    pub fn new_sequence() -> Self {
        Self { data: BufferData::Sequence(SmallVec::new()), capacity: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill with the type's silence (zero samples, or an empty event list).
    pub fn clear(&mut self) {
        match &mut self.data {
            BufferData::Audio(v) | BufferData::Cv(v) => v.iter_mut().for_each(|s| *s = 0.0),
            BufferData::Control(v) => *v = 0.0,
            BufferData::Sequence(events) => events.clear(),
        }
    }

    /// Called once per period before any reader/writer touches the buffer.
    /// Sequence buffers reset their event list; sample buffers are left
    /// untouched (the Executor or a `Connection` will overwrite the frames
    /// it owns before any reader runs).
    pub fn prepare(&mut self, _nframes: usize) {
        if let BufferData::Sequence(events) = &mut self.data {
            events.clear();
        }
    }

    /// Fill frames `[start, end)` with `value`. Audio/Control/Cv only.
    pub fn set_block(&mut self, value: f32, start: usize, end: usize) {
        match &mut self.data {
            BufferData::Audio(v) | BufferData::Cv(v) => {
                for s in &mut v[start..end] {
                    *s = value;
                }
            }
            BufferData::Control(v) => *v = value,
            BufferData::Sequence(_) => {
                debug_assert!(false, "set_block is not defined for Sequence buffers");
            }
        }
    }

    /// Copy frames `[start, end)` from `src`, which must be the same kind
    /// of buffer.
    pub fn copy(&mut self, src: &Buffer, start: usize, end: usize) {
        match (&mut self.data, &src.data) {
            (BufferData::Audio(dst), BufferData::Audio(s))
            | (BufferData::Cv(dst), BufferData::Cv(s)) => {
                dst[start..end].copy_from_slice(&s[start..end]);
            }
            (BufferData::Control(dst), BufferData::Control(s)) => {
                *dst = *s;
            }
            (BufferData::Sequence(dst), BufferData::Sequence(s)) => {
                dst.clear();
                dst.extend(s.iter().copied());
            }
            _ => debug_assert!(false, "copy() between mismatched buffer kinds"),
        }
    }

    /// Accumulate `src`'s frames `[start, end)` into this buffer (sample-wise
    /// add for Audio/Cv/Control, merge-by-timestamp for Sequence).
    pub fn mix(&mut self, src: &Buffer, start: usize, end: usize) {
        match (&mut self.data, &src.data) {
            (BufferData::Audio(dst), BufferData::Audio(s))
            | (BufferData::Cv(dst), BufferData::Cv(s)) => {
                for i in start..end {
                    dst[i] += s[i];
                }
            }
            (BufferData::Control(dst), BufferData::Control(s)) => {
                *dst += *s;
            }
            (BufferData::Sequence(dst), BufferData::Sequence(s)) => {
                dst.extend(s.iter().copied());
                dst.sort_by_key(|e| e.frame_offset);
            }
            _ => debug_assert!(false, "mix() between mismatched buffer kinds"),
        }
    }

    pub fn as_audio(&self) -> &[f32] {
        match &self.data {
            BufferData::Audio(v) | BufferData::Cv(v) => v,
            _ => panic!("buffer is not an Audio/Cv buffer"),
        }
    }

    pub fn as_audio_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            BufferData::Audio(v) | BufferData::Cv(v) => v,
            _ => panic!("buffer is not an Audio/Cv buffer"),
        }
    }

    pub fn control_value(&self) -> f32 {
        match &self.data {
            BufferData::Control(v) => *v,
            _ => panic!("buffer is not a Control buffer"),
        }
    }

    pub fn set_control_value(&mut self, value: f32) {
        match &mut self.data {
            BufferData::Control(v) => *v = value,
            _ => panic!("buffer is not a Control buffer"),
        }
    }

    pub fn events(&self) -> &[SeqEvent] {
        match &self.data {
            BufferData::Sequence(events) => events,
            _ => panic!("buffer is not a Sequence buffer"),
        }
    }

    pub fn push_event(&mut self, event: SeqEvent) {
        match &mut self.data {
            BufferData::Sequence(events) => events.push(event),
            _ => panic!("buffer is not a Sequence buffer"),
        }
    }

    pub fn is_silent(&self) -> bool {
        match &self.data {
            BufferData::Audio(v) | BufferData::Cv(v) => v.iter().all(|&s| s == 0.0),
            BufferData::Control(v) => *v == 0.0,
            BufferData::Sequence(events) => events.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_zeroes_audio() {
        let mut b = Buffer::new_audio(4);
        b.set_block(1.0, 0, 4);
        b.clear();
        assert_eq!(b.as_audio(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn mix_accumulates() {
        let mut dst = Buffer::new_audio(4);
        dst.set_block(1.0, 0, 4);
        let mut src = Buffer::new_audio(4);
        src.set_block(2.0, 0, 4);
        dst.mix(&src, 0, 4);
        assert_eq!(dst.as_audio(), &[3.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn sequence_mix_merges_by_time() {
        let mut dst = Buffer::new_sequence();
        dst.push_event(SeqEvent { frame_offset: 10, payload: EventPayload::Trigger });
        let mut src = Buffer::new_sequence();
        src.push_event(SeqEvent { frame_offset: 2, payload: EventPayload::Trigger });
        dst.mix(&src, 0, 0);
        let times: Vec<u32> = dst.events().iter().map(|e| e.frame_offset).collect();
        assert_eq!(times, vec![2, 10]);
    }
}
