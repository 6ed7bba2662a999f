//! Turns a client [`Command`] into a [`PreparedEvent`] and queues it (§4.9).
//! Runs on a single, non-realtime "main" thread: it is the only place that
//! reads or writes the [`Store`], the only place that instantiates or
//! activates a plugin (§4.3: both `PluginFactory::instantiate` and
//! `PluginMainThread::activate` are `[main-thread]`-only calls), and the
//! only place `compiler::compile_order` runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use audiograph_core::{Host, HostInfo, Instance, PortType};
use basedrop::Shared;

use crate::command::{Command, Op, PropertyValue, Response};
use crate::compiler;
use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::event_queue::{EventProducer, QueueError, TimedEvent};
use crate::events::{
    MixBufferChange, PolyVoiceUpdate, PreparedBlock, PreparedBlockKind, PreparedConnection, PreparedDelete, PreparedDisconnect, PreparedEvent,
    PreparedPort,
};
use crate::path::Path;
use crate::port::{self, Direction};
use crate::registry::PluginRegistry;
use crate::store::{ObjectRef, Store};

pub struct PreProcessor {
    store: Arc<Store>,
    events: EventProducer,
    registry: Arc<PluginRegistry>,
    host: Arc<Host>,
    host_info: Shared<HostInfo>,
    reclaim_handle: basedrop::Handle,
    settings: EngineSettings,
    frame_clock: Arc<AtomicU64>,
    /// Signalled by `PostProcessor::post_process` once a blocking event has
    /// both executed and been notified (§4.9): carries the `request_id` so
    /// a stray stale ack (there should never be more than one in flight)
    /// can be told apart from the one this call is actually waiting for.
    ack: crossbeam_channel::Receiver<u64>,
}

impl PreProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        events: EventProducer,
        registry: Arc<PluginRegistry>,
        host: Arc<Host>,
        host_info: Shared<HostInfo>,
        reclaim_handle: basedrop::Handle,
        settings: EngineSettings,
        frame_clock: Arc<AtomicU64>,
        ack: crossbeam_channel::Receiver<u64>,
    ) -> Self {
        Self { store, events, registry, host, host_info, reclaim_handle, settings, frame_clock, ack }
    }

    /// Handle one inbound `Command` end to end: validate and mutate the
    /// `Store`, build the `PreparedEvent`, stamp and enqueue it, and — if
    /// it is a blocking event — wait for the PostProcessor's ack before
    /// returning (so the *next* `prepare()` call is guaranteed to see this
    /// one's effects already reflected in the `Store`).
    pub fn prepare(&mut self, cmd: Command) -> Response {
        let request_id = cmd.request_id;
        let status = self.prepare_op(cmd.op).and_then(|event| self.enqueue(event, request_id));
        Response { request_id, status }
    }

    fn enqueue(&mut self, event: PreparedEvent, request_id: u64) -> Result<(), EngineError> {
        let blocking = event.is_blocking();
        let scheduled_frame = self.frame_clock.load(Ordering::Acquire) + self.settings.delivery_margin_frames;

        let mut attempts = 0;
        while self.events.is_full() && attempts < self.settings.enqueue_retry_limit {
            std::thread::yield_now();
            attempts += 1;
        }

        let timed = TimedEvent { event, request_id, scheduled_frame, blocking };
        match self.events.push(timed) {
            Ok(()) => {
                if blocking {
                    self.wait_for_ack(request_id);
                }
                Ok(())
            }
            Err(QueueError::Full) => Err(EngineError::QueueFull),
            Err(QueueError::Empty) => unreachable!("push() never returns Empty"),
        }
    }

    fn wait_for_ack(&self, request_id: u64) {
        loop {
            match self.ack.recv() {
                Ok(acked) if acked == request_id => return,
                Ok(_stale) => continue,
                Err(_disconnected) => return,
            }
        }
    }

    fn prepare_op(&mut self, op: Op) -> Result<PreparedEvent, EngineError> {
        match op {
            Op::CreateGraph { parent, symbol, internal_poly } => self.create_graph(parent, symbol, internal_poly),
            Op::CreateBlock { parent, symbol, plugin_id, poly } => self.create_block(parent, symbol, plugin_id, poly),
            Op::CreatePort { parent, symbol, port_type, direction, poly, min, max } => {
                self.create_port(parent, symbol, port_type, direction, poly, min, max)
            }
            Op::Connect { src, dst } => self.connect(src, dst),
            Op::Disconnect { src, dst } => self.disconnect(src, dst),
            Op::DisconnectAll { path } => self.disconnect_all(path),
            Op::Delete { path } => self.delete(path),
            Op::Move { path, new_path } => self.move_path(path, new_path),
            Op::SetPortValue { path, value, frame_offset } => self.set_port_value(path, value, frame_offset),
            Op::SetProperty { path, key, value } => self.set_property(path, key, value),
            Op::EnableGraph { path } => {
                self.require_graph(&path)?;
                Ok(PreparedEvent::EnableGraph { path })
            }
            Op::DisableGraph { path } => {
                self.require_graph(&path)?;
                Ok(PreparedEvent::DisableGraph { path })
            }
            Op::RegisterClient { client_id } => Ok(PreparedEvent::RegisterClient { client_id }),
            Op::UnregisterClient { client_id } => Ok(PreparedEvent::UnregisterClient { client_id }),
            Op::Ping => Ok(PreparedEvent::Ping),
        }
    }

    fn require_graph(&self, path: &Path) -> Result<usize, EngineError> {
        match self.store.find(path) {
            Some(ObjectRef::Graph { internal_poly }) => Ok(internal_poly),
            Some(_) => Err(EngineError::TypeMismatch { expected: "graph", found: "block-or-port" }),
            None => Err(EngineError::NotFound(path.clone())),
        }
    }

    fn require_port(&self, path: &Path) -> Result<(PortType, Direction), EngineError> {
        match self.store.find(path) {
            Some(ObjectRef::Port { port_type, direction, .. }) => Ok((port_type, direction)),
            Some(_) => Err(EngineError::TypeMismatch { expected: "port", found: "graph-or-block" }),
            None => Err(EngineError::NotFound(path.clone())),
        }
    }

    /// The graph(s) a port could be scoped to for ordering purposes (§3,
    /// §4.5): an ordinary port's only scope is the graph containing its
    /// owning Block. A Graph's external ports "appear twice... once as
    /// internal bridge endpoints" of the subgraph itself, so a bridge
    /// port's owner path is a *candidate* scope in its own right, on top
    /// of the usual one (the graph containing the subgraph) — both are
    /// valid depending on which side of the boundary the other endpoint
    /// of the connection sits on.
    fn port_scopes(&self, port: &Path) -> Result<Vec<Path>, EngineError> {
        let owner = port.parent().ok_or_else(|| EngineError::BadPath(format!("{} has no owning block", port)))?;
        match self.store.find(&owner) {
            Some(ObjectRef::Graph { .. }) => {
                let mut scopes = vec![owner.clone()];
                if let Some(outer) = owner.parent() {
                    scopes.push(outer);
                }
                Ok(scopes)
            }
            Some(ObjectRef::Block { parent, .. }) => Ok(vec![parent]),
            Some(ObjectRef::Port { .. }) => Err(EngineError::TypeMismatch { expected: "graph-or-block", found: "port" }),
            None => Err(EngineError::NotFound(owner)),
        }
    }

    /// Resolve the one scope shared by both endpoints of a connection,
    /// preferring the most deeply nested match: connecting a subgraph's
    /// own bridge ports to each other, or to one of the subgraph's own
    /// children, is scoped inside the subgraph; connecting a bridge port
    /// to a sibling of the subgraph itself is scoped one level out.
    fn shared_scope(&self, src: &Path, dst: &Path) -> Result<Path, EngineError> {
        let src_scopes = self.port_scopes(src)?;
        let dst_scopes = self.port_scopes(dst)?;
        src_scopes
            .iter()
            .filter(|s| dst_scopes.contains(s))
            .max_by_key(|s| s.depth())
            .cloned()
            .ok_or_else(|| EngineError::ParentDiffers {
                a: src_scopes.into_iter().next().unwrap_or_else(Path::root),
                b: dst_scopes.into_iter().next().unwrap_or_else(Path::root),
            })
    }

    /// Recompute whether `dst_port` needs a private mix buffer after a
    /// `Connect`/`Disconnect` has just changed its inbound connection set
    /// (§3, §4.4): more than one inbound connection, or a poly-to-mono
    /// one, always needs one; anything else reads the sink's own buffer
    /// directly. The buffer array itself is allocated right here, off the
    /// audio thread, so `Executor::execute` only ever installs or drops it
    /// (§4.7, §8 "the Executor performs no heap allocations") — sized the
    /// same way a freshly created port's own buffers are
    /// (`settings.max_frames`, §4.9).
    ///
    /// `None` means `dst_port` does not resolve to a live `Port` in the
    /// Store (a stale path raced by an intervening mutation); `execute()`
    /// then has nothing to install or drop either.
    fn mix_change_for(&self, dst_port: &Path) -> Option<MixBufferChange> {
        let (dst_type, dst_poly) = match self.store.find(dst_port) {
            Some(ObjectRef::Port { port_type, poly, .. }) => (port_type, poly),
            _ => return None,
        };
        let sources = self.store.sources_of(dst_port);
        let needs_mix = sources.len() > 1
            || sources.iter().any(|src| {
                matches!(self.store.find(src), Some(ObjectRef::Port { poly: src_poly, .. }) if src_poly > 1 && dst_poly == 1)
            });
        Some(if needs_mix {
            MixBufferChange::Install(port::new_mix_buffers(dst_type, dst_poly, self.settings.max_frames))
        } else {
            MixBufferChange::Drop
        })
    }

    fn recompile_order(&self, parent: &Path) -> Result<Vec<Path>, EngineError> {
        self.trial_compile(parent, None)
    }

    fn trial_compile(&self, parent: &Path, add_edge: Option<(&Path, &Path)>) -> Result<Vec<Path>, EngineError> {
        let child_order = self.store.child_order(parent);
        let mut providers = self.store.providers();
        if let Some((dst_block, src_block)) = add_edge {
            let entry = providers.entry(dst_block.clone()).or_default();
            if !entry.contains(src_block) {
                entry.push(src_block.clone());
            }
        }
        compiler::compile_order(&child_order, &providers)
    }

    fn create_graph(&mut self, parent: Path, symbol: String, internal_poly: usize) -> Result<PreparedEvent, EngineError> {
        self.require_graph(&parent)?;
        let path = parent.child(&symbol).map_err(|e| EngineError::BadPath(e.to_string()))?;
        if self.store.exists(&path) {
            return Err(EngineError::Exists(path));
        }
        if internal_poly == 0 {
            return Err(EngineError::BadPoly { requested: internal_poly, reason: "polyphony must be at least 1" });
        }

        self.store.add(path.clone(), ObjectRef::Graph { internal_poly })?;
        self.store.add_child(&parent, path.clone());
        let new_order = self.recompile_order(&parent)?;

        Ok(PreparedEvent::CreateGraph { parent, path, internal_poly, external_ports: Vec::new(), new_order })
    }

    fn create_block(&mut self, parent: Path, symbol: String, plugin_id: String, poly: usize) -> Result<PreparedEvent, EngineError> {
        self.require_graph(&parent)?;
        let path = parent.child(&symbol).map_err(|e| EngineError::BadPath(e.to_string()))?;
        if self.store.exists(&path) {
            return Err(EngineError::Exists(path));
        }
        if poly == 0 {
            return Err(EngineError::BadPoly { requested: poly, reason: "polyphony must be at least 1" });
        }

        let factory = self
            .registry
            .get(&plugin_id)
            .ok_or_else(|| EngineError::PluginUnavailable(plugin_id.clone()))?;

        let mut instances: Vec<Instance> = Vec::with_capacity(poly);
        let mut ports: Option<Vec<PreparedPort>> = None;
        for _ in 0..poly {
            let mut main_thread = factory
                .instantiate(self.host_info.clone(), &self.reclaim_handle)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            main_thread.init(&self.host, &self.reclaim_handle);

            // Port layout may only be queried while inactive, so read it
            // before `activate()` flips that state (§4.3).
            if ports.is_none() {
                ports = Some(
                    main_thread
                        .ports()
                        .into_iter()
                        .map(|info| PreparedPort {
                            symbol: info.symbol.into_owned(),
                            direction: if info.is_input { Direction::Input } else { Direction::Output },
                            port_type: info.port_type,
                            poly,
                            buffer_size: self.settings.max_frames,
                            min: info.min_value,
                            max: info.max_value,
                        })
                        .collect(),
                );
            }

            let audio_thread = main_thread
                .activate(
                    self.settings.sample_rate.as_f64(),
                    self.settings.min_frames,
                    self.settings.max_frames,
                    &self.host,
                    &self.reclaim_handle,
                )
                .map_err(|e| EngineError::Internal(e.to_string()))?;

            instances.push(Instance { main_thread, audio_thread: Some(audio_thread) });
        }
        let ports = ports.unwrap_or_default();

        self.store.add(path.clone(), ObjectRef::Block { parent: parent.clone(), poly, plugin_id: plugin_id.clone() })?;
        for (i, p) in ports.iter().enumerate() {
            let port_path = path.child(&p.symbol).map_err(|e| EngineError::BadPath(e.to_string()))?;
            self.store.add(
                port_path,
                ObjectRef::Port { block: path.clone(), index: i, port_type: p.port_type, direction: p.direction, poly: p.poly, min: p.min, max: p.max },
            )?;
        }
        self.store.add_child(&parent, path.clone());
        let new_order = self.recompile_order(&parent)?;

        let block = PreparedBlock { symbol, poly, ports, kind: PreparedBlockKind::Plugin(instances) };
        Ok(PreparedEvent::CreateBlock { parent, path, block, new_order })
    }

    #[allow(clippy::too_many_arguments)]
    fn create_port(
        &mut self,
        parent: Path,
        symbol: String,
        port_type: PortType,
        direction: Direction,
        poly: usize,
        min: f64,
        max: f64,
    ) -> Result<PreparedEvent, EngineError> {
        match self.store.find(&parent) {
            Some(ObjectRef::Graph { .. }) | Some(ObjectRef::Block { .. }) => {}
            Some(ObjectRef::Port { .. }) => return Err(EngineError::TypeMismatch { expected: "graph-or-block", found: "port" }),
            None => return Err(EngineError::NotFound(parent)),
        }
        let path = parent.child(&symbol).map_err(|e| EngineError::BadPath(e.to_string()))?;
        if self.store.exists(&path) {
            return Err(EngineError::Exists(path));
        }
        if poly == 0 {
            return Err(EngineError::BadPoly { requested: poly, reason: "polyphony must be at least 1" });
        }

        let index = self.store.direct_children(&parent).len();
        self.store.add(
            path,
            ObjectRef::Port { block: parent.clone(), index, port_type, direction, poly, min, max },
        )?;

        let port = PreparedPort { symbol, direction, port_type, poly, buffer_size: self.settings.max_frames, min, max };
        Ok(PreparedEvent::CreatePort { owner: parent, port })
    }

    fn connect(&mut self, src: Path, dst: Path) -> Result<PreparedEvent, EngineError> {
        let parent = self.shared_scope(&src, &dst)?;

        let (src_type, src_dir) = self.require_port(&src)?;
        let (dst_type, dst_dir) = self.require_port(&dst)?;

        // An endpoint used in its bridge sense (its owner *is* the chosen
        // scope, i.e. a subgraph's own bridge ports) never constrains
        // sibling ordering: it is populated or drained outside the
        // compiled traversal, so it never appears in the provider DAG and
        // there is no cycle to check. An ordinary edge still needs the
        // pre-commit cycle check, so a rejected Connect never leaves a
        // dangling provider edge.
        let src_block = src.parent().expect("checked by shared_scope");
        let dst_block = dst.parent().expect("checked by shared_scope");
        let src_bridging = src_block == parent;
        let dst_bridging = dst_block == parent;

        // The Store records a Graph's external port by the direction its
        // *parent* sees (an "in" port carries data into the subgraph, so
        // it is stored as `Direction::Input`). Used in its bridge sense —
        // feeding the subgraph's own children rather than the subgraph's
        // own parent — that same port is the *source* of an edge, the
        // opposite of its stored direction (§4.14's boundary blocks mirror
        // it flipped for exactly this reason).
        let effective_src_dir = if src_bridging { src_dir.opposite() } else { src_dir };
        let effective_dst_dir = if dst_bridging { dst_dir.opposite() } else { dst_dir };
        if effective_src_dir != Direction::Output || effective_dst_dir != Direction::Input {
            return Err(EngineError::TypeMismatch { expected: "output port -> input port", found: "mismatched direction" });
        }
        if !src_type.compatible_with(dst_type) {
            return Err(EngineError::TypeMismatch { expected: "compatible port types", found: "incompatible port types" });
        }

        let bridging = src_bridging || dst_bridging;
        let new_order = if bridging {
            self.recompile_order(&parent)?
        } else {
            self.trial_compile(&parent, Some((&dst_block, &src_block)))?
        };
        self.store.connect(src.clone(), dst.clone());
        let dst_mix = self.mix_change_for(&dst);

        Ok(PreparedEvent::Connect { parent, connection: PreparedConnection { src_path: src, dst_path: dst, dst_mix }, new_order })
    }

    fn disconnect(&mut self, src: Path, dst: Path) -> Result<PreparedEvent, EngineError> {
        let parent = self.shared_scope(&src, &dst)?;

        self.store.disconnect(&src, &dst);
        let new_order = self.recompile_order(&parent)?;
        let dst_mix = self.mix_change_for(&dst);

        Ok(PreparedEvent::Disconnect(PreparedDisconnect { parent, src_path: src, dst_path: dst, new_order, dst_mix }))
    }

    fn disconnect_all(&mut self, path: Path) -> Result<PreparedEvent, EngineError> {
        if !self.store.exists(&path) {
            return Err(EngineError::NotFound(path));
        }
        let parent = path.parent().ok_or_else(|| EngineError::BadPath("the root graph has no parent to disconnect within".into()))?;

        let links = self.store.port_links_touching(&path);
        for (src, dst) in &links {
            self.store.disconnect(src, dst);
        }
        let new_order = self.recompile_order(&parent)?;
        // Every distinct sink among the torn-down links may have had its
        // inbound count change; recompute each exactly once, after every
        // link in this batch has already been removed from the Store.
        let disconnects = links
            .into_iter()
            .map(|(src_path, dst_path)| {
                let dst_mix = self.mix_change_for(&dst_path);
                PreparedDisconnect { parent: parent.clone(), src_path, dst_path, new_order: new_order.clone(), dst_mix }
            })
            .collect();

        Ok(PreparedEvent::DisconnectAll { disconnects })
    }

    fn delete(&mut self, path: Path) -> Result<PreparedEvent, EngineError> {
        if !self.store.exists(&path) {
            return Err(EngineError::NotFound(path));
        }
        let parent = path.parent().ok_or_else(|| EngineError::BadPath("the root graph cannot be deleted".into()))?;

        // Gather and apply this object's own boundary disconnects first
        // (§4.13: "Gather cascading disconnects"), so the Store never holds
        // a dangling edge onto the object being removed.
        let links = self.store.port_links_touching(&path);
        for (src, dst) in &links {
            self.store.disconnect(src, dst);
        }
        let order_after_disconnects = self.recompile_order(&parent)?;
        let cascaded_disconnects = links
            .into_iter()
            .map(|(src_path, dst_path)| {
                let dst_mix = self.mix_change_for(&dst_path);
                PreparedDisconnect {
                    parent: parent.clone(),
                    src_path,
                    dst_path,
                    new_order: order_after_disconnects.clone(),
                    dst_mix,
                }
            })
            .collect();

        for descendant in self.store.subtree(&path) {
            self.store.remove(&descendant);
        }
        let new_order = self.recompile_order(&parent)?;

        Ok(PreparedEvent::Delete(PreparedDelete { path, parent, cascaded_disconnects, new_order }))
    }

    fn move_path(&mut self, path: Path, new_path: Path) -> Result<PreparedEvent, EngineError> {
        if !self.store.exists(&path) {
            return Err(EngineError::NotFound(path));
        }
        if self.store.exists(&new_path) {
            return Err(EngineError::Exists(new_path));
        }
        self.store.rename(&path, &new_path)?;
        Ok(PreparedEvent::Move { old: path, new: new_path })
    }

    fn set_port_value(&mut self, path: Path, value: f64, frame_offset: usize) -> Result<PreparedEvent, EngineError> {
        let (port_type, min, max) = match self.store.find(&path) {
            Some(ObjectRef::Port { port_type, min, max, .. }) => (port_type, min, max),
            Some(_) => return Err(EngineError::TypeMismatch { expected: "port", found: "graph-or-block" }),
            None => return Err(EngineError::NotFound(path)),
        };
        if !matches!(port_type, PortType::Control | PortType::Cv) {
            return Err(EngineError::TypeMismatch { expected: "control-or-cv port", found: "audio-or-sequence port" });
        }
        Ok(PreparedEvent::SetPortValue { path, value: value.clamp(min, max), frame_offset })
    }

    fn set_property(&mut self, path: Path, key: String, value: PropertyValue) -> Result<PreparedEvent, EngineError> {
        if !self.store.exists(&path) {
            return Err(EngineError::NotFound(path));
        }
        if key == "internal_poly" {
            if let PropertyValue::Int(n) = value {
                return self.set_internal_poly(path, n);
            }
            return Err(EngineError::TypeMismatch { expected: "int", found: "non-int property value" });
        }
        Ok(PreparedEvent::SetProperty { path, key, value })
    }

    /// `set_internal_poly`'s phase 1 (§4.5): re-instantiate every
    /// plugin-backed direct child whose polyphony tracks the graph's own
    /// (per the data model invariant, a Block's polyphony is either 1 or
    /// equal to the enclosing Graph's `internal_poly`) at the new voice
    /// count, leaving phase 2's atomic swap to `execute()`. Internal and
    /// nested-Graph children are left untouched: the former are always
    /// mono by construction, the latter track their own `internal_poly`.
    fn set_internal_poly(&mut self, path: Path, internal_poly: i64) -> Result<PreparedEvent, EngineError> {
        let old_poly = self.require_graph(&path)?;
        if internal_poly <= 0 {
            return Err(EngineError::BadPoly { requested: internal_poly.max(0) as usize, reason: "polyphony must be at least 1" });
        }
        let new_poly = internal_poly as usize;

        let mut updates = Vec::new();
        for child in self.store.direct_children(&path) {
            let Some(ObjectRef::Block { poly, plugin_id, .. }) = self.store.find(&child) else { continue };
            if poly != old_poly {
                continue;
            }
            let update = self.reinstantiate_block(&child, &plugin_id, new_poly)?;
            self.store.set_block_poly(&child, new_poly);
            updates.push(update);
        }
        self.store.set_graph_poly(&path, new_poly);

        Ok(PreparedEvent::SetInternalPoly { path, internal_poly: new_poly, updates })
    }

    fn reinstantiate_block(&mut self, block_path: &Path, plugin_id: &str, poly: usize) -> Result<PolyVoiceUpdate, EngineError> {
        let factory = self.registry.get(plugin_id).ok_or_else(|| EngineError::PluginUnavailable(plugin_id.to_string()))?;

        let mut instances: Vec<Instance> = Vec::with_capacity(poly);
        let mut ports: Option<Vec<PreparedPort>> = None;
        for _ in 0..poly {
            let mut main_thread = factory
                .instantiate(self.host_info.clone(), &self.reclaim_handle)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            main_thread.init(&self.host, &self.reclaim_handle);

            if ports.is_none() {
                ports = Some(
                    main_thread
                        .ports()
                        .into_iter()
                        .map(|info| PreparedPort {
                            symbol: info.symbol.into_owned(),
                            direction: if info.is_input { Direction::Input } else { Direction::Output },
                            port_type: info.port_type,
                            poly,
                            buffer_size: self.settings.max_frames,
                            min: info.min_value,
                            max: info.max_value,
                        })
                        .collect(),
                );
            }

            let audio_thread = main_thread
                .activate(
                    self.settings.sample_rate.as_f64(),
                    self.settings.min_frames,
                    self.settings.max_frames,
                    &self.host,
                    &self.reclaim_handle,
                )
                .map_err(|e| EngineError::Internal(e.to_string()))?;

            instances.push(Instance { main_thread, audio_thread: Some(audio_thread) });
        }

        Ok(PolyVoiceUpdate { block_path: block_path.clone(), instances, ports: ports.unwrap_or_default() })
    }
}
