//! Built-in primitives (§4.14): blocks with no `Instance` and no
//! activate/deactivate lifecycle beyond the owning `Block`'s own. They
//! exist purely to give the Compiler and Executor a uniform `Block` to
//! walk at graph boundaries and for client-driven scalar/event input.

use audiograph_core::ProcInfo;

use crate::port::Port;

/// Which built-in primitive a `Block` wraps.
pub enum InternalBlock {
    /// Bridges a root graph's external audio input into the graph: a
    /// no-op copy, since the Executor's input-pull step (§4.7 step 2)
    /// already wrote the backend's samples directly into this block's
    /// single output port.
    AudioIn,
    /// Bridges a root graph's external audio output out of the graph: a
    /// no-op, the Executor's output-push step reads this block's single
    /// input port directly.
    AudioOut,
    /// Presents the latest value written by `SetPortValue` as a Control
    /// output port. `run()` is a no-op: `Port::set_scalar` already keeps
    /// the buffer current.
    ControlIn,
    /// Presents the latest controller-automation value as a Control
    /// output port, identically to `ControlIn` but fed by a different
    /// client-facing property rather than `SetPortValue`.
    ControllerIn,
    /// Presents a Sequence output port fed by decoded note-on/note-off
    /// events from the backend's MIDI-like input stream.
    NoteIn,
    /// Presents a Sequence output port fed by decoded trigger events.
    TriggerIn,
}

impl InternalBlock {
    pub fn run(&self, _proc: &ProcInfo, _ports: &mut [Port]) {
        // Every internal primitive is a pure pass-through: its output
        // port buffer is kept current by the event pipeline (SetPortValue,
        // decoded backend events) or the Executor's input-pull/output-push
        // steps, never by block-local computation.
    }
}
