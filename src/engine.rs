//! Engine activation (§4.9, §5 design notes): wires a `Store`, the two
//! event rings, the ack channel, and a `Host`/`Reclaimer` pair into a
//! `PreProcessor`/`PostProcessor`/`Executor` trio. There is no process-wide
//! singleton: the embedder owns the returned `Engine` (and runs its
//! `PreProcessor`/`PostProcessor` on whatever non-realtime thread it likes)
//! alongside the `Executor`, which it hands to its own `AudioBackend`
//! callback.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use audiograph_core::{Host, HostInfo};
use basedrop::Shared;

use crate::config::EngineSettings;
use crate::event_queue::{self, EventProducer};
use crate::graph::Graph;
use crate::notification::Notification;
use crate::path::Path;
use crate::postprocessor::PostProcessor;
use crate::preprocessor::PreProcessor;
use crate::reclaim::Reclaimer;
use crate::registry::PluginRegistry;
use crate::store::{ObjectRef, Store};

pub use crate::executor::Executor;

/// The non-realtime half of an activated engine: everything a client talks
/// to. Its `PreProcessor` and `PostProcessor` are plain structs, not
/// threads of their own — call `drive()` from whatever thread the embedder
/// runs its command loop on (the teacher drives its own bookkeeping this
/// way off the `RtThread` callback; here there is simply no forced thread
/// topology).
pub struct Engine {
    store: Arc<Store>,
    registry: Arc<PluginRegistry>,
    pre: PreProcessor,
    post: PostProcessor,
    /// Signalled by the `Executor` once per period (§4.7 step 5), so an
    /// embedder can block on `wake()` instead of polling `drive()` on a
    /// timer.
    wake: crossbeam_channel::Receiver<()>,
}

impl Engine {
    /// Activate a new engine: seeds the `Store` with a root graph, builds
    /// both event rings and the ack channel, and returns the non-realtime
    /// `Engine` paired with the `Executor` the embedder's `AudioBackend`
    /// callback will drive once per period.
    ///
    /// `notify` is the single broadcast channel every `Notification` is
    /// published on (DESIGN.md: per-client routing is left to the
    /// embedding wire protocol).
    pub fn activate(
        settings: EngineSettings,
        registry: PluginRegistry,
        host_info: HostInfo,
        notify: crossbeam_channel::Sender<Notification>,
    ) -> (Engine, Executor) {
        let store = Arc::new(Store::new());
        store
            .add(Path::root(), ObjectRef::Graph { internal_poly: 1 })
            .expect("root path is freshly created");

        let registry = Arc::new(registry);
        let host = Arc::new(Host::new());
        let reclaimer = Reclaimer::new();
        let reclaim_handle = reclaimer.handle();
        let host_info: Shared<HostInfo> = Shared::new(&reclaim_handle, host_info);

        let (events_tx, events_rx) = event_queue::event_queue(settings.event_queue_capacity);
        let (outbox_tx, outbox_rx) = event_queue::outbox(settings.event_queue_capacity);
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        let frame_clock = Arc::new(AtomicU64::new(0));

        let pre = PreProcessor::new(
            Arc::clone(&store),
            events_tx,
            Arc::clone(&registry),
            Arc::clone(&host),
            host_info,
            reclaim_handle.clone(),
            settings,
            Arc::clone(&frame_clock),
            ack_rx,
        );
        let post = PostProcessor::new(outbox_rx, reclaimer, ack_tx, notify);

        let root = Graph::new_root(Path::root(), 1);
        let executor = Executor::new(
            root,
            events_rx,
            outbox_tx,
            wake_tx,
            settings,
            host,
            reclaim_handle,
            frame_clock,
        );

        (Engine { store, registry, pre, post, wake: wake_rx }, executor)
    }

    /// Run one client command to completion: validates and queues it, and
    /// (for a blocking event) waits for the Executor/PostProcessor to
    /// finish applying it before returning.
    pub fn submit(&mut self, cmd: crate::command::Command) -> crate::command::Response {
        self.pre.prepare(cmd)
    }

    /// Drain whatever the Executor has finished since the last call and
    /// run the Reclaimer's collector. Call this periodically from the same
    /// thread that calls `submit` — e.g. once per `AudioBackend` period,
    /// right after the realtime callback returns.
    pub fn drive(&mut self) {
        self.post.run();
    }

    /// Borrow the submitting half and the notifying half independently,
    /// for an embedder that runs them on two different threads rather
    /// than interleaving `submit`/`drive` on one (§4.9): a blocking
    /// `submit` (`CreateGraph`/`CreateBlock`/`CreatePort`/`Move`) only
    /// returns once some thread has drained the outbox through the
    /// `PostProcessor` half's own `run()`, which a single caller
    /// blocked inside `submit` can never do for itself.
    pub fn split_mut(&mut self) -> (&mut PreProcessor, &mut PostProcessor) {
        (&mut self.pre, &mut self.post)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// The Executor's per-period wake signal (§4.7 step 5). Draining it is
    /// optional: `drive()` works regardless of whether a period's wake was
    /// observed, since the outbox ring — not this channel — is the source
    /// of truth for what to process.
    pub fn wake(&self) -> &crossbeam_channel::Receiver<()> {
        &self.wake
    }
}

/// An `EventProducer` exists only to be moved into the `Executor`'s paired
/// `EventConsumer` at construction time; re-exported so downstream crates
/// building their own wiring (rather than using `Engine::activate`) can
/// still name the type.
pub type RawEventProducer = EventProducer;
