//! The closed set of mutation/query events (§4.13). A [`Command`]'s `Op`
//! (§6) is turned into a `PreparedEvent` by [`crate::preprocessor`]'s
//! `prepare()` step (allowed to allocate, look up the `Store`, instantiate
//! plugins); [`crate::executor`]'s `execute()` step applies it to the live
//! tree (realtime-safe, no allocation); [`crate::postprocessor`]'s
//! `post_process()` step emits the resulting `Notification`(s) and hands
//! detached structures to the `Reclaimer`.
//!
//! Splitting the table this way — one module per thread, one enum shared
//! between them — keeps each thread's half of an event colocated with the
//! other operations that run on that thread, instead of scattering
//! `prepare`/`execute`/`post_process` methods across fourteen small
//! per-event types.

use smallvec::SmallVec;

use audiograph_core::{Buffer, Instance, PortType};

use crate::command::PropertyValue;
use crate::internal_blocks::InternalBlock;
use crate::path::Path;
use crate::port::{Direction, Port};

/// The shape of a port to be built, resolved during `prepare()` against the
/// caller's request; turned into a live `Port` by `execute()`.
#[derive(Debug, Clone)]
pub struct PreparedPort {
    pub symbol: String,
    pub direction: Direction,
    pub port_type: PortType,
    pub poly: usize,
    pub buffer_size: usize,
    pub min: f64,
    pub max: f64,
}

impl PreparedPort {
    pub fn build(&self, owner: &Path, index: usize) -> Port {
        Port::new(
            owner.child(&self.symbol).expect("symbol validated in prepare()"),
            self.symbol.clone(),
            index,
            self.direction,
            self.port_type,
            self.poly,
            self.buffer_size,
            self.min,
            self.max,
        )
    }
}

/// What kind of `Block` a `CreateBlock` builds. Plugin instantiation (via
/// `PluginFactory`) and `PluginMainThread::activate()` both happen here, in
/// `prepare()`; `execute()` only calls `Block::activate()`, which starts
/// each voice's already-built `PluginAudioThread` processing (§4.3).
pub enum PreparedBlockKind {
    Internal(InternalBlock),
    Plugin(Vec<Instance>),
}

pub struct PreparedBlock {
    pub symbol: String,
    pub poly: usize,
    pub ports: Vec<PreparedPort>,
    pub kind: PreparedBlockKind,
}

/// What must happen to a sink port's private mix buffer after a
/// `Connect`/`Disconnect` changes its inbound connection count or a
/// poly-to-mono routing need (§3, §4.4). Computed and allocated in
/// `prepare()` (the PreProcessor thread) so `execute()` only ever installs
/// or drops an already-built buffer array — it never allocates one itself
/// (§4.7, §8 "the Executor performs no heap allocations").
pub enum MixBufferChange {
    /// The port now has more than one inbound connection, or a
    /// poly-to-mono one: install this freshly allocated, correctly sized
    /// buffer array.
    Install(SmallVec<[Buffer; 1]>),
    /// The port is back down to at most one ordinary (mono/poly-matched)
    /// inbound connection: drop any previously installed mix buffer so
    /// `effective_buffer` reads the port's own (now current) buffer again.
    Drop,
}

/// A connection's endpoints, named by path only: per §3's lifecycle rule
/// ("Once installed [a Block/Port] may be mutated only in the audio
/// thread"), the PreProcessor never dereferences the live tree, so it
/// cannot resolve a `BlockId`/port index here. `execute()` re-resolves both
/// endpoints against the live tree at install time.
pub struct PreparedConnection {
    pub src_path: Path,
    pub dst_path: Path,
    /// The sink's mix-buffer requirement after this connection lands, if
    /// it changed (`None` when the sink's buffer situation is unaffected,
    /// e.g. it already had >1 inbound connection before this one joined).
    pub dst_mix: Option<MixBufferChange>,
}

/// One `Disconnect`'s worth of resolved state, shared by the standalone
/// `Disconnect` event and by `DisconnectAll`/`Delete`'s cascades.
pub struct PreparedDisconnect {
    pub parent: Path,
    pub src_path: Path,
    pub dst_path: Path,
    pub new_order: Vec<Path>,
    /// The sink's mix-buffer requirement after this disconnect lands, if
    /// it changed.
    pub dst_mix: Option<MixBufferChange>,
}

pub struct PreparedDelete {
    pub path: Path,
    pub parent: Path,
    /// Cascading disconnects gathered before the delete (§4.13: "Gather
    /// cascading disconnects"), applied first so no dangling `Connection`
    /// ever references the deleted object mid-delete.
    pub cascaded_disconnects: Vec<PreparedDisconnect>,
    pub new_order: Vec<Path>,
}

/// One polyphonic child's freshly-instantiated voices, built in `prepare()`
/// at the new voice count (§4.5 `set_internal_poly`'s phase 1). `execute()`
/// swaps these into the live `Block` and hands its previous instances and
/// ports to the Reclaimer.
pub struct PolyVoiceUpdate {
    pub block_path: Path,
    pub instances: Vec<Instance>,
    pub ports: Vec<PreparedPort>,
}

/// The result of one `prepare()` call (§4.13), queued onto the `EventQueue`
/// after being stamped into a `TimedEvent` (§4.9 step 3).
pub enum PreparedEvent {
    CreateGraph {
        parent: Path,
        path: Path,
        internal_poly: usize,
        external_ports: Vec<PreparedPort>,
        new_order: Vec<Path>,
    },
    CreateBlock {
        parent: Path,
        path: Path,
        block: PreparedBlock,
        new_order: Vec<Path>,
    },
    CreatePort {
        owner: Path,
        port: PreparedPort,
    },
    Connect {
        parent: Path,
        connection: PreparedConnection,
        new_order: Vec<Path>,
    },
    Disconnect(PreparedDisconnect),
    DisconnectAll {
        disconnects: Vec<PreparedDisconnect>,
    },
    Delete(PreparedDelete),
    Move {
        old: Path,
        new: Path,
    },
    SetPortValue {
        path: Path,
        value: f64,
        frame_offset: usize,
    },
    SetProperty {
        path: Path,
        key: String,
        value: PropertyValue,
    },
    /// `SetProperty(internal_poly)` targeting a `Graph` (§4.5, §9 Open
    /// Question #3): a dedicated variant rather than a generic
    /// `SetProperty` payload, since it carries a freshly built batch of
    /// per-block voice arrays rather than a single scalar value.
    SetInternalPoly {
        path: Path,
        internal_poly: usize,
        updates: Vec<PolyVoiceUpdate>,
    },
    EnableGraph {
        path: Path,
    },
    DisableGraph {
        path: Path,
    },
    RegisterClient {
        client_id: crate::command::ClientId,
    },
    UnregisterClient {
        client_id: crate::command::ClientId,
    },
    Ping,
}

impl PreparedEvent {
    /// Whether the *next* command's `prepare()` must wait for this event to
    /// finish `execute()` and `post_process()` before running (§4.9): used
    /// when a later command's `prepare()` needs to look up an object this
    /// one creates, e.g. `CreateGraph` immediately followed by a
    /// `CreateBlock` inside it.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            PreparedEvent::CreateGraph { .. }
                | PreparedEvent::CreateBlock { .. }
                | PreparedEvent::CreatePort { .. }
                | PreparedEvent::Move { .. }
        )
    }
}

/// What actually happened, reduced to exactly what `post_process()` (§4.10)
/// needs to turn into a [`crate::notification::Notification`]. Produced by
/// `Executor::execute` as it consumes a `PreparedEvent` — consuming rather
/// than borrowing lets a `CreateBlock`'s `Instance`s move straight into the
/// installed `Block` instead of needing to be cloned (plugin instances are
/// not `Clone`).
pub enum EventOutcome {
    Put { path: Path, properties: Vec<(String, PropertyValue)> },
    Delta { path: Path, removed: Vec<String>, added: Vec<(String, PropertyValue)> },
    Connect { src: Path, dst: Path },
    Disconnect { src: Path, dst: Path },
    /// `DisconnectAll`'s links, each turned into its own
    /// `Notification::Disconnect` by `post_process()`.
    DisconnectAll { links: Vec<(Path, Path)> },
    Delete { path: Path },
    Move { old: Path, new: Path },
    RegisterClient { client_id: crate::command::ClientId },
    UnregisterClient { client_id: crate::command::ClientId },
    Ping,
    /// The event was a no-op at execute time (its target vanished between
    /// `prepare()` and `execute()`, e.g. raced by an intervening `Delete`).
    Noop,
}
