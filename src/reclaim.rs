//! Deferred reclamation (component design §4.12: "the Maid").
//!
//! The realtime thread never calls `drop` on anything it removes from the
//! live graph: an `Owned<T>` handed to it is simply let go (moved into a
//! `Shared<T>`'s refcount drop, or replaced in a `SharedCell`), and the
//! actual deallocation happens later, off the audio thread, when
//! [`Reclaimer::collect`] runs. This is exactly what `basedrop::Collector`
//! already does; `Reclaimer` is a named handle onto one.

use basedrop::{Collector, Handle};

pub struct Reclaimer {
    collector: Collector,
}

impl Reclaimer {
    pub fn new() -> Self {
        Self { collector: Collector::new() }
    }

    /// A cloneable handle realtime and non-realtime code alike use to wrap
    /// values in `Shared`/`Owned`/`SharedCell` without ever calling into
    /// the allocator themselves at drop time.
    pub fn handle(&self) -> Handle {
        self.collector.handle()
    }

    /// Walk the collector's queue of dropped allocations and actually free
    /// them. Called periodically from the PostProcessor thread, never from
    /// the Executor.
    pub fn collect(&mut self) {
        self.collector.collect();
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new()
    }
}
