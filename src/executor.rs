//! Per-period realtime traversal using the installed `CompiledGraph`s
//! (§4.7). The `Executor` is not itself a thread: it is driven by whatever
//! thread the embedding `AudioBackend` calls back on, exactly once per
//! period, via [`Executor::run_period`].
//!
//! The Executor never allocates, never blocks on a lock, and never calls a
//! destructor on a structure it detaches: every `execute()` that removes a
//! live object wraps it in a [`basedrop::Owned`] and lets it fall out of
//! scope immediately, which defers the actual drop to the Reclaimer's
//! collector queue instead of running it here (§4.12, design note on the
//! "maid").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use audiograph_core::{Host, ProcInfo};
use basedrop::Owned;

use crate::backend::AudioBackend;
use crate::block::{Block, BlockId, BlockKind};
use crate::command::PropertyValue;
use crate::config::EngineSettings;
use crate::connection::Connection;
use crate::event_queue::{EventConsumer, ExecutedEvent, OutboxProducer, QueueError};
use crate::events::{EventOutcome, MixBufferChange, PolyVoiceUpdate, PreparedBlockKind, PreparedDelete, PreparedDisconnect, PreparedEvent};
use crate::graph::Graph;
use crate::path::Path;
use crate::port::Direction;
use crate::tree;

/// Signals the PostProcessor to wake up after a period has been processed
/// (§4.7 step 5). A bounded channel of capacity 1 coalesces wakeups the way
/// a semaphore would: a pending signal is never duplicated.
pub type WakeSignal = crossbeam_channel::Sender<()>;

pub struct Executor {
    root: Graph,
    events: EventConsumer,
    outbox: OutboxProducer,
    wake: WakeSignal,
    settings: EngineSettings,
    host: Arc<Host>,
    reclaim_handle: basedrop::Handle,
    /// Published so the PreProcessor can stamp new events with a delivery
    /// time relative to the period currently in flight (§4.9 step 3),
    /// without reaching into the `AudioBackend` itself.
    frame_clock: Arc<AtomicU64>,
}

impl Executor {
    pub fn new(
        root: Graph,
        events: EventConsumer,
        outbox: OutboxProducer,
        wake: WakeSignal,
        settings: EngineSettings,
        host: Arc<Host>,
        reclaim_handle: basedrop::Handle,
        frame_clock: Arc<AtomicU64>,
    ) -> Self {
        Self { root, events, outbox, wake, settings, host, reclaim_handle, frame_clock }
    }

    /// One full period (§4.7). `nframes` must lie within the negotiated
    /// `[min_frames, max_frames]` range.
    pub fn run_period(&mut self, nframes: usize, backend: &mut dyn AudioBackend) {
        let period_start_frame = backend.current_frame();
        self.frame_clock.store(period_start_frame, Ordering::Release);

        self.root.prepare_ports(nframes);
        self.drain_events(nframes, period_start_frame);
        self.pull_inputs(backend);

        let proc = ProcInfo { frames: nframes, steady_time: period_start_frame };
        self.root.run_period(&proc, &self.host);

        self.push_outputs(backend);

        let _ = self.wake.try_send(());
    }

    /// §4.7 step 1. Drains events whose scheduled frame falls within this
    /// period's window, capped at `nframes / min_event_frames` to bound
    /// worst-case work (§4.7, §9 Open Question #2).
    fn drain_events(&mut self, nframes: usize, period_start_frame: u64) {
        let cap = (nframes / self.settings.min_event_frames.max(1)).max(1);
        let window_end = period_start_frame + nframes as u64;

        for _ in 0..cap {
            match self.events.peek_scheduled_frame() {
                Some(t) if t <= window_end => {}
                _ => break,
            }
            let timed = match self.events.pop() {
                Ok(e) => e,
                Err(_) => break,
            };

            // Late events (scheduled before this period started) run at its
            // very start rather than at their original offset (§4.7 step 1).
            let _offset = timed.scheduled_frame.max(period_start_frame).saturating_sub(period_start_frame);

            let outcome = self.execute(timed.event);

            let executed = ExecutedEvent { outcome, request_id: timed.request_id, blocking: timed.blocking };
            if let Err(QueueError::Full) = self.outbox.push(executed) {
                log::error!("postprocessor outbox full; dropping an executed event's notification");
            }
        }
    }

    fn pull_inputs(&mut self, backend: &dyn AudioBackend) {
        let inputs = backend.inputs();
        let mut idx = 0;
        for port in self.root.external_ports_owned_mut().iter_mut().filter(|p| p.direction == Direction::Input) {
            if let Some(src) = inputs.get(idx) {
                let cap = src.capacity().min(port.buffer(0).capacity());
                port.buffer_mut(0).copy(src, 0, cap);
            }
            idx += 1;
        }
        // Mirror into the root graph's own boundary (§4.14) so its direct
        // children read this period's input the same way a nested
        // subgraph's children read their parent's bridge ports.
        self.root.sync_inputs_to_boundary();
    }

    fn push_outputs(&mut self, backend: &mut dyn AudioBackend) {
        self.root.sync_outputs_from_boundary();
        let outputs = backend.outputs();
        let mut idx = 0;
        for port in self.root.external_ports_owned_mut().iter().filter(|p| p.direction == Direction::Output) {
            if let Some(dst) = outputs.get_mut(idx) {
                let cap = dst.capacity().min(port.buffer(0).capacity());
                dst.copy(port.buffer(0), 0, cap);
            }
            idx += 1;
        }
    }

    /// Apply one event's mutation to the live tree (§4.13 "execute (RT)"
    /// column) and report what happened. Failures here are invariant
    /// violations (§7): a target that vanished between `prepare()` and
    /// `execute()` is logged and turned into `EventOutcome::Noop` rather
    /// than panicking, matching spec.md's propagation policy that
    /// `execute()` itself never returns a `Result`.
    fn execute(&mut self, event: PreparedEvent) -> EventOutcome {
        match event {
            PreparedEvent::CreateGraph { parent, path, internal_poly, external_ports, new_order } => {
                let block_ports = external_ports.iter().enumerate().map(|(i, p)| p.build(&path, i)).collect::<Vec<_>>();
                let graph_ports = external_ports.iter().enumerate().map(|(i, p)| p.build(&path, i)).collect::<Vec<_>>();
                let nested = Graph::new_nested(path.clone(), internal_poly, graph_ports);
                let symbol = path.symbol().unwrap_or("").to_string();
                let block = Block::new(path.clone(), symbol, 1, block_ports, BlockKind::Graph(Box::new(nested)));

                let Some(graph) = tree::find_graph_mut(&mut self.root, &parent) else {
                    log::error!("CreateGraph: parent {} vanished before execute", parent);
                    return EventOutcome::Noop;
                };
                graph.add_block(block);
                let old = graph.resolve_and_install(&new_order);
                self.reclaim(old);
                EventOutcome::Put { path, properties: vec![("internal_poly".into(), PropertyValue::Int(internal_poly as i64))] }
            }

            PreparedEvent::CreateBlock { parent, path, block, new_order } => {
                let ports = block.ports.iter().enumerate().map(|(i, p)| p.build(&path, i)).collect::<Vec<_>>();
                let kind = match block.kind {
                    PreparedBlockKind::Internal(b) => BlockKind::Internal(b),
                    PreparedBlockKind::Plugin(instances) => BlockKind::Plugin { instances },
                };
                let mut live = Block::new(path.clone(), block.symbol, block.poly, ports, kind);
                live.activate();

                let Some(graph) = tree::find_graph_mut(&mut self.root, &parent) else {
                    log::error!("CreateBlock: parent {} vanished before execute", parent);
                    return EventOutcome::Noop;
                };
                graph.add_block(live);
                let old = graph.resolve_and_install(&new_order);
                self.reclaim(old);
                EventOutcome::Put { path, properties: vec![("poly".into(), PropertyValue::Int(block.poly as i64))] }
            }

            PreparedEvent::CreatePort { owner, port } => {
                let symbol = port.symbol.clone();
                // A Graph's external ports are visible twice (§3, §4.14):
                // once as the wrapping Block's own ports (read by the
                // parent's Connections and by `Block::run`'s boundary
                // copy), once mirrored into the nested graph's boundary
                // block (read by the subgraph's own children). Both live
                // at `owner`'s path and must be kept in step.
                let is_graph = tree::find_graph_mut(&mut self.root, &owner).is_some();
                if is_graph {
                    if let Some(graph) = tree::find_graph_mut(&mut self.root, &owner) {
                        let index = graph.external_ports().len();
                        graph.add_external_port(port.build(&owner, index));
                    }
                    if let Some(block) = tree::find_block_mut(&mut self.root, &owner) {
                        let index = block.ports.len();
                        block.ports.push(port.build(&owner, index));
                    }
                } else if let Some(block) = tree::find_block_mut(&mut self.root, &owner) {
                    let index = block.ports.len();
                    block.ports.push(port.build(&owner, index));
                } else {
                    log::error!("CreatePort: owner {} vanished before execute", owner);
                    return EventOutcome::Noop;
                }
                EventOutcome::Put { path: owner.child(&symbol).unwrap_or(owner.clone()), properties: Vec::new() }
            }

            PreparedEvent::Connect { parent, connection, new_order } => {
                let (src, dst) = (connection.src_path.clone(), connection.dst_path.clone());
                let Some(graph) = tree::find_graph_mut(&mut self.root, &parent) else {
                    log::error!("Connect: parent {} vanished before execute", parent);
                    return EventOutcome::Noop;
                };
                match resolve_connection(graph, &src, &dst) {
                    Some((conn, dst_block, dst_port)) => {
                        let _ = graph.add_connection(conn);
                        self.apply_mix_change(graph, dst_block, dst_port, connection.dst_mix);
                    }
                    None => self.reclaim(connection.dst_mix),
                }
                let old = graph.resolve_and_install(&new_order);
                self.reclaim(old);
                EventOutcome::Connect { src, dst }
            }

            PreparedEvent::Disconnect(d) => {
                let (src, dst) = (d.src_path.clone(), d.dst_path.clone());
                self.execute_disconnect(d);
                EventOutcome::Disconnect { src, dst }
            }

            PreparedEvent::DisconnectAll { disconnects } => {
                let links = disconnects.iter().map(|d| (d.src_path.clone(), d.dst_path.clone())).collect();
                for d in disconnects {
                    self.execute_disconnect(d);
                }
                EventOutcome::DisconnectAll { links }
            }

            PreparedEvent::Delete(d) => {
                let PreparedDelete { path, parent, cascaded_disconnects, new_order } = d;
                for disc in cascaded_disconnects {
                    self.execute_disconnect(disc);
                }
                let Some(graph) = tree::find_graph_mut(&mut self.root, &parent) else {
                    log::error!("Delete: parent {} vanished before execute", parent);
                    return EventOutcome::Noop;
                };
                if let Some(id) = graph.find_block_by_path(&path) {
                    let mut removed = graph.remove_block(id);
                    if let Some(b) = removed.as_mut() {
                        b.deactivate();
                    }
                    if let Some(b) = removed {
                        let _ = Owned::new(&self.reclaim_handle, b);
                    }
                }
                let old = graph.resolve_and_install(&new_order);
                self.reclaim(old);
                EventOutcome::Delete { path }
            }

            PreparedEvent::Move { old, new } => {
                let Some(old_parent) = old.parent() else {
                    log::error!("Move: cannot rename the root");
                    return EventOutcome::Noop;
                };
                let Some(graph) = tree::find_graph_mut(&mut self.root, &old_parent) else {
                    log::error!("Move: parent of {} vanished before execute", old);
                    return EventOutcome::Noop;
                };
                let Some(id) = graph.find_block_by_path(&old) else {
                    log::error!("Move: {} vanished before execute", old);
                    return EventOutcome::Noop;
                };
                if let Some(block) = graph.block_mut(id) {
                    rename_subtree(block, &old, &new);
                }
                EventOutcome::Move { old, new }
            }

            PreparedEvent::SetPortValue { path, value, frame_offset } => {
                if let Some(port) = tree::find_port_mut(&mut self.root, &path) {
                    let nframes = port.buffer(0).capacity().max(1);
                    port.set_scalar(value, frame_offset, nframes);
                    EventOutcome::Delta { path, removed: Vec::new(), added: vec![("value".into(), PropertyValue::Float(value))] }
                } else {
                    log::error!("SetPortValue: {} vanished before execute", path);
                    EventOutcome::Noop
                }
            }

            PreparedEvent::SetProperty { path, key, value } => self.apply_set_property(path, key, value),

            PreparedEvent::SetInternalPoly { path, internal_poly, updates } => {
                self.execute_set_internal_poly(path, internal_poly, updates)
            }

            PreparedEvent::EnableGraph { path } => {
                if let Some(graph) = tree::find_graph_mut(&mut self.root, &path) {
                    graph.enable();
                    EventOutcome::Delta { path, removed: Vec::new(), added: vec![("enabled".into(), PropertyValue::Bool(true))] }
                } else {
                    log::error!("EnableGraph: {} vanished before execute", path);
                    EventOutcome::Noop
                }
            }

            PreparedEvent::DisableGraph { path } => {
                if let Some(graph) = tree::find_graph_mut(&mut self.root, &path) {
                    graph.disable();
                    EventOutcome::Delta { path, removed: Vec::new(), added: vec![("enabled".into(), PropertyValue::Bool(false))] }
                } else {
                    log::error!("DisableGraph: {} vanished before execute", path);
                    EventOutcome::Noop
                }
            }

            PreparedEvent::RegisterClient { client_id } => EventOutcome::RegisterClient { client_id },
            PreparedEvent::UnregisterClient { client_id } => EventOutcome::UnregisterClient { client_id },
            PreparedEvent::Ping => EventOutcome::Ping,
        }
    }

    fn execute_disconnect(&mut self, d: PreparedDisconnect) {
        let Some(graph) = tree::find_graph_mut(&mut self.root, &d.parent) else {
            log::error!("Disconnect: parent {} vanished before execute", d.parent);
            return;
        };
        match endpoint_ids(graph, &d.src_path, &d.dst_path) {
            Some((src_block, src_port, dst_block, dst_port)) => {
                if let Some(id) = graph.find_connection(src_block, src_port, dst_block, dst_port) {
                    if let Some(c) = graph.remove_connection(id) {
                        let _ = Owned::new(&self.reclaim_handle, c);
                    }
                }
                self.apply_mix_change(graph, dst_block, dst_port, d.dst_mix);
            }
            None => self.reclaim(d.dst_mix),
        }
        let old = graph.resolve_and_install(&d.new_order);
        self.reclaim(old);
    }

    /// Install or drop a sink port's private mix buffer computed off the
    /// audio thread (§4.7, §9 Open Question for mix-buffer lifetime). If
    /// the port no longer resolves (raced by an intervening mutation), the
    /// already-allocated buffer is handed to the Reclaimer rather than
    /// dropped in place, so its deallocation never runs here.
    fn apply_mix_change(&self, graph: &mut Graph, dst_block: BlockId, dst_port: usize, change: Option<MixBufferChange>) {
        let Some(change) = change else { return };
        match graph.block_mut(dst_block).and_then(|b| b.ports.get_mut(dst_port)) {
            Some(port) => match change {
                MixBufferChange::Install(buffers) => port.install_mix_buffers(buffers),
                MixBufferChange::Drop => port.drop_mix_buffer(),
            },
            None => self.reclaim(Some(change)),
        }
    }

    fn apply_set_property(&mut self, path: Path, key: String, value: PropertyValue) -> EventOutcome {
        match key.as_str() {
            "enabled" => {
                if let (Some(graph), PropertyValue::Bool(b)) = (tree::find_graph_mut(&mut self.root, &path), &value) {
                    if *b {
                        graph.enable();
                    } else {
                        graph.disable();
                    }
                    return EventOutcome::Delta { path, removed: Vec::new(), added: vec![(key, value)] };
                }
            }
            // "internal_poly" is routed through the dedicated
            // `SetInternalPoly` event (§4.5 phase 2's voice swap needs
            // freshly built `Instance`s, not a scalar value).
            _ => log::warn!("SetProperty: unknown key '{}' on {}", key, path),
        }
        EventOutcome::Noop
    }

    /// `set_internal_poly`'s phase 2 (§4.5, §9 Open Question #3): swap each
    /// affected block's voices and ports in under the graph's own
    /// `internal_poly` update, then refresh the routing of every
    /// connection touching that block (polyphony changed, endpoints did
    /// not). Old instances and ports are handed to the Reclaimer, never
    /// dropped here.
    fn execute_set_internal_poly(&mut self, path: Path, internal_poly: usize, updates: Vec<PolyVoiceUpdate>) -> EventOutcome {
        let Some(graph) = tree::find_graph_mut(&mut self.root, &path) else {
            log::error!("SetInternalPoly: {} vanished before execute", path);
            return EventOutcome::Noop;
        };
        graph.internal_poly = internal_poly;

        for update in updates {
            let ports = update.ports.iter().enumerate().map(|(i, p)| p.build(&update.block_path, i)).collect::<Vec<_>>();
            let Some(graph) = tree::find_graph_mut(&mut self.root, &path) else { continue };
            let Some(id) = graph.find_block_by_path(&update.block_path) else {
                log::error!("SetInternalPoly: block {} vanished before execute", update.block_path);
                continue;
            };
            let Some(block) = graph.block_mut(id) else { continue };

            block.deactivate();
            if let BlockKind::Plugin { instances } = &mut block.kind {
                let old = std::mem::replace(instances, update.instances);
                self.reclaim(Some(old));
            }
            let old_ports = std::mem::replace(&mut block.ports, ports);
            self.reclaim(Some(old_ports));
            block.poly = internal_poly;
            block.activate();

            graph.refresh_routing_for_block(id);
        }

        EventOutcome::Delta {
            path,
            removed: Vec::new(),
            added: vec![("internal_poly".into(), PropertyValue::Int(internal_poly as i64))],
        }
    }

    fn reclaim<T: Send + 'static>(&self, value: Option<T>) {
        if let Some(v) = value {
            let _ = Owned::new(&self.reclaim_handle, v);
        }
    }

    /// Test-only introspection: a port's latched scalar value, reached the
    /// same way `SetPortValue`'s `execute()` arm does (§4.2). A real
    /// embedder never needs this — it only ever sees the graph through
    /// `Notification`s — so this has no reason to exist outside tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn port_value(&self, path: &Path) -> Option<f64> {
        tree::find_port(&self.root, path).map(|p| p.current_value())
    }

    /// Test-only introspection: a port's voice-0 sample buffer, for
    /// observing the mid-period half-set-cycle split on a `Cv` port (§4.2)
    /// that `port_value` alone can't see.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn port_samples(&self, path: &Path) -> Option<Vec<f32>> {
        tree::find_port(&self.root, path).map(|p| p.buffer(0).as_audio().to_vec())
    }
}

fn resolve_connection(graph: &Graph, src_path: &Path, dst_path: &Path) -> Option<(Connection, BlockId, usize)> {
    let (src_block, src_port, dst_block, dst_port) = endpoint_ids(graph, src_path, dst_path)?;
    let src_poly = graph.block(src_block)?.ports[src_port].poly;
    let dst_poly = graph.block(dst_block)?.ports[dst_port].poly;
    let conn = Connection::new(src_block, src_port, src_poly, dst_block, dst_port, dst_poly);
    Some((conn, dst_block, dst_port))
}

/// Resolve both endpoints of a connection to a concrete `(BlockId, port
/// index)` pair within `graph`. A port whose owner path *is* `graph`'s own
/// path is a bridge endpoint (§3: a Graph's external ports double as
/// internal bridge endpoints, §4.14): it resolves to the matching boundary
/// block's mirrored port instead of a literal child block.
fn endpoint_ids(graph: &Graph, src_path: &Path, dst_path: &Path) -> Option<(BlockId, usize, BlockId, usize)> {
    let src_owner = src_path.parent()?;
    let dst_owner = dst_path.parent()?;

    let src_block = if src_owner == graph.path { graph.boundary_in()? } else { graph.find_block_by_path(&src_owner)? };
    let dst_block = if dst_owner == graph.path { graph.boundary_out()? } else { graph.find_block_by_path(&dst_owner)? };

    let src_port = graph.block(src_block)?.port_index_by_symbol(src_path.symbol()?)?;
    let dst_port = graph.block(dst_block)?.port_index_by_symbol(dst_path.symbol()?)?;
    Some((src_block, src_port, dst_block, dst_port))
}

/// Rename `block` (and, if it wraps a nested graph, every descendant) from
/// under `old` to under `new` (§4.13 `Move`).
fn rename_subtree(block: &mut Block, old: &Path, new: &Path) {
    block.path = block.path.rebase(old, new);
    for p in block.ports.iter_mut() {
        p.path = p.path.rebase(old, new);
    }
    if let BlockKind::Graph(nested) = &mut block.kind {
        nested.path = nested.path.rebase(old, new);
        for p in nested.external_ports_owned_mut().iter_mut() {
            p.path = p.path.rebase(old, new);
        }
        for child in nested.blocks_mut() {
            rename_subtree(child, old, new);
        }
    }
}
