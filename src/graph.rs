//! Composite block: holds child blocks, its own external ports, and the
//! connections between them (§4.5).

use fnv::FnvHashMap;

use audiograph_core::{Host, ProcInfo};

use crate::block::{Block, BlockId, BlockKind};
use crate::compiler::{self, CompiledGraph};
use crate::connection::{Connection, ConnectionId};
use crate::error::EngineError;
use crate::internal_blocks::InternalBlock;
use crate::path::Path;
use crate::port::{Direction, Port};

/// A `Graph` is a `Block` whose children are `Block`s and `Connection`s
/// (§3). Both collections are slabs: indices (`BlockId`/`ConnectionId`)
/// stay valid across unrelated removals so the Compiler's adjacency lists
/// and installed `CompiledGraph`s never need renumbering.
pub struct Graph {
    pub path: Path,
    pub enabled: bool,
    pub internal_poly: usize,

    blocks: Vec<Option<Block>>,
    free_blocks: Vec<BlockId>,
    /// Child-insertion order, for the Compiler's deterministic tie-break
    /// (§4.6). Filtered on removal; never reordered otherwise.
    block_order: Vec<BlockId>,

    connections: Vec<Option<Connection>>,
    free_connections: Vec<ConnectionId>,

    /// This graph's external ports as seen by its parent `Block` (§3).
    external_ports: Vec<Port>,
    /// The internal-facing boundary blocks (§4.14) this graph's own
    /// children connect to: `AudioIn`/`ControlIn`/etc mirroring
    /// `external_ports`' input-direction members, and `AudioOut`/etc
    /// mirroring the output-direction members. Always installed (even for
    /// the root graph, whose `external_ports` are kept in sync against
    /// the `AudioBackend` by the `Executor` rather than by a parent
    /// `Block::run`), so a `Connect` targeting a bridge port resolves the
    /// same way regardless of nesting depth.
    boundary_in: Option<BlockId>,
    boundary_out: Option<BlockId>,

    compiled: Option<CompiledGraph>,
    cleared_while_disabled: bool,
}

impl Graph {
    /// The root graph: no parent `Block`, so its boundary blocks are kept
    /// in sync by the `Executor` itself (`sync_inputs_to_boundary` /
    /// `sync_outputs_from_boundary`) against the `AudioBackend`'s buffers,
    /// rather than by a parent `Block::run` against a wrapper's ports.
    pub fn new_root(path: Path, internal_poly: usize) -> Self {
        let mut g = Self::new(path, internal_poly, Vec::new());
        g.install_boundary_blocks();
        g
    }

    /// A nested subgraph with the given external port shape (symbol,
    /// direction, type, polyphony, buffer size, min, max), mirrored into
    /// matching boundary blocks.
    pub fn new_nested(
        path: Path,
        internal_poly: usize,
        external_ports: Vec<Port>,
    ) -> Self {
        let mut g = Self::new(path, internal_poly, external_ports);
        g.install_boundary_blocks();
        g
    }

    fn new(path: Path, internal_poly: usize, external_ports: Vec<Port>) -> Self {
        Self {
            path,
            enabled: true,
            internal_poly: internal_poly.max(1),
            blocks: Vec::new(),
            free_blocks: Vec::new(),
            block_order: Vec::new(),
            connections: Vec::new(),
            free_connections: Vec::new(),
            external_ports,
            boundary_in: None,
            boundary_out: None,
            compiled: None,
            cleared_while_disabled: false,
        }
    }

    fn install_boundary_blocks(&mut self) {
        let boundary_in_path = self.path.child("_in").expect("valid boundary symbol");
        let boundary_out_path = self.path.child("_out").expect("valid boundary symbol");

        let in_ports: Vec<Port> = self
            .external_ports
            .iter()
            .filter(|p| p.direction == Direction::Input)
            .map(|p| clone_port_shape(p, Direction::Output, &boundary_in_path))
            .collect();
        let out_ports: Vec<Port> = self
            .external_ports
            .iter()
            .filter(|p| p.direction == Direction::Output)
            .map(|p| clone_port_shape(p, Direction::Input, &boundary_out_path))
            .collect();

        let boundary_in = Block::new(boundary_in_path, "_in".to_string(), 1, in_ports, BlockKind::Internal(InternalBlock::AudioIn));
        let boundary_out = Block::new(boundary_out_path, "_out".to_string(), 1, out_ports, BlockKind::Internal(InternalBlock::AudioOut));

        self.boundary_in = Some(self.add_block(boundary_in));
        self.boundary_out = Some(self.add_block(boundary_out));
    }

    pub fn external_ports(&self) -> &[Port] {
        &self.external_ports
    }

    /// Add one more external (parent-facing) port after construction,
    /// mirroring it into the matching boundary block (§4.14) so the new
    /// port is immediately visible to this graph's own children too.
    /// Used by `CreatePort` targeting a `Graph`-kind `Block` (§4.13).
    pub fn add_external_port(&mut self, port: Port) {
        let boundary = match port.direction {
            Direction::Input => self.boundary_in,
            Direction::Output => self.boundary_out,
        };
        if let Some(bid) = boundary {
            let owner = self.block(bid).map(|b| b.path.clone());
            if let Some(owner) = owner {
                let bridge = clone_port_shape(&port, port.direction.opposite(), &owner);
                if let Some(block) = self.block_mut(bid) {
                    block.ports.push(bridge);
                }
            }
        }
        self.external_ports.push(port);
    }

    pub fn external_ports_mut(&mut self) -> &mut [Port] {
        &mut self.external_ports
    }

    pub fn boundary_in(&self) -> Option<BlockId> {
        self.boundary_in
    }

    pub fn boundary_out(&self) -> Option<BlockId> {
        self.boundary_out
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id).and_then(|b| b.as_ref())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id).and_then(|b| b.as_mut())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id).and_then(|c| c.as_ref())
    }

    /// Recompute every connection touching `block`'s routing policy from
    /// its endpoints' current port polyphony (§4.5 `set_internal_poly`
    /// phase 2): the connection's endpoints are unchanged, only how voices
    /// are routed between them, since one side's polyphony just changed.
    pub fn refresh_routing_for_block(&mut self, block: BlockId) {
        let touching: Vec<ConnectionId> = self
            .connections
            .iter()
            .enumerate()
            .filter_map(|(id, c)| c.as_ref().filter(|c| c.src_block == block || c.dst_block == block).map(|_| id))
            .collect();
        for id in touching {
            let (src_block, src_port, dst_block, dst_port) = {
                let c = self.connections[id].as_ref().unwrap();
                (c.src_block, c.src_port, c.dst_block, c.dst_port)
            };
            let src_poly = self.block(src_block).map_or(1, |b| b.ports[src_port].poly);
            let dst_poly = self.block(dst_block).map_or(1, |b| b.ports[dst_port].poly);
            if let Some(c) = self.connections[id].as_mut() {
                c.update_routing(src_poly, dst_poly);
            }
        }
    }

    pub fn find_block_by_path(&self, path: &Path) -> Option<BlockId> {
        self.block_order.iter().copied().find(|&id| self.blocks[id].as_ref().unwrap().path == *path)
    }

    pub fn find_connection(&self, src: BlockId, src_port: usize, dst: BlockId, dst_port: usize) -> Option<ConnectionId> {
        self.connections.iter().enumerate().find_map(|(id, c)| {
            let c = c.as_ref()?;
            (c.src_block == src && c.src_port == src_port && c.dst_block == dst && c.dst_port == dst_port)
                .then_some(id)
        })
    }

    /// O(1) amortized: reuses a freed slot if one exists.
    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = if let Some(id) = self.free_blocks.pop() {
            self.blocks[id] = Some(block);
            id
        } else {
            self.blocks.push(Some(block));
            self.blocks.len() - 1
        };
        self.block_order.push(id);
        id
    }

    pub fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        let block = self.blocks.get_mut(id)?.take()?;
        self.block_order.retain(|&o| o != id);
        self.free_blocks.push(id);
        // Drop any connection referencing the removed block and unwind its
        // place in neighboring providers/dependants lists.
        let dangling: Vec<ConnectionId> = self
            .connections
            .iter()
            .enumerate()
            .filter_map(|(cid, c)| {
                let c = c.as_ref()?;
                (c.src_block == id || c.dst_block == id).then_some(cid)
            })
            .collect();
        for cid in dangling {
            self.remove_connection(cid);
        }
        Some(block)
    }

    pub fn add_connection(&mut self, conn: Connection) -> Result<ConnectionId, EngineError> {
        let (src, dst) = (conn.src_block, conn.dst_block);
        let id = if let Some(id) = self.free_connections.pop() {
            self.connections[id] = Some(conn);
            id
        } else {
            self.connections.push(Some(conn));
            self.connections.len() - 1
        };

        if let Some(b) = self.blocks.get_mut(dst).and_then(|b| b.as_mut()) {
            if !b.providers.contains(&src) {
                b.providers.push(src);
            }
        }
        if let Some(b) = self.blocks.get_mut(src).and_then(|b| b.as_mut()) {
            if !b.dependants.contains(&dst) {
                b.dependants.push(dst);
            }
        }
        Ok(id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.get_mut(id)?.take()?;
        self.free_connections.push(id);

        let still_linked = self.connections.iter().any(|c| {
            c.as_ref().is_some_and(|c| c.src_block == conn.src_block && c.dst_block == conn.dst_block)
        });
        if !still_linked {
            if let Some(b) = self.blocks.get_mut(conn.dst_block).and_then(|b| b.as_mut()) {
                b.providers.retain(|&p| p != conn.src_block);
            }
            if let Some(b) = self.blocks.get_mut(conn.src_block).and_then(|b| b.as_mut()) {
                b.dependants.retain(|&d| d != conn.dst_block);
            }
        }
        Some(conn)
    }

    /// This graph's children, in insertion order — mirrored into the
    /// `Store`'s topology by `PreProcessor` so `compiler::compile_order`
    /// never has to touch the live graph.
    pub fn child_order(&self) -> impl Iterator<Item = &Path> {
        self.block_order.iter().map(|&id| &self.blocks[id].as_ref().unwrap().path)
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.iter_mut().flatten()
    }

    pub fn external_ports_owned_mut(&mut self) -> &mut Vec<Port> {
        &mut self.external_ports
    }

    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        (0..self.connections.len()).filter(|&id| self.connections[id].is_some())
    }

    /// Resolve a `Path`-ordered schedule (from `compiler::compile_order`)
    /// into a concrete `CompiledGraph` and install it.
    pub fn resolve_and_install(&mut self, order: &[Path]) -> Option<CompiledGraph> {
        let compiled = compiler::resolve(self, order);
        self.install_compiled(compiled)
    }

    pub fn install_compiled(&mut self, compiled: CompiledGraph) -> Option<CompiledGraph> {
        self.compiled.replace(compiled)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.cleared_while_disabled = false;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub(crate) fn copy_into_boundary_in(&mut self, external_index: usize, src: &Port) {
        if let Some(bid) = self.boundary_in {
            if let Some(block) = self.block_mut(bid) {
                if let Some(dst) = block.ports.get_mut(external_index) {
                    copy_port(src, dst);
                }
            }
        }
    }

    pub(crate) fn copy_from_boundary_out(&mut self, external_index: usize, dst: &mut Port) {
        if let Some(bid) = self.boundary_out {
            if let Some(block) = self.block(bid) {
                if let Some(src) = block.ports.get(external_index) {
                    copy_port(src, dst);
                }
            }
        }
    }

    /// The root graph's counterpart to `Block::run`'s `copy_into_boundary_in`
    /// loop: called by the `Executor` right after it pulls the
    /// `AudioBackend`'s buffers into `external_ports`, so this graph's own
    /// direct children see the new period's input the same way a nested
    /// graph's children see their parent's.
    pub(crate) fn sync_inputs_to_boundary(&mut self) {
        let Some(bid) = self.boundary_in else { return };
        let mut i = 0;
        for port in self.external_ports.iter().filter(|p| p.direction == Direction::Input) {
            if let Some(block) = self.blocks.get_mut(bid).and_then(|b| b.as_mut()) {
                if let Some(dst) = block.ports.get_mut(i) {
                    copy_port(port, dst);
                }
            }
            i += 1;
        }
    }

    /// The root graph's counterpart to `Block::run`'s `copy_from_boundary_out`
    /// loop: called by the `Executor` right before it pushes
    /// `external_ports` out to the `AudioBackend`.
    pub(crate) fn sync_outputs_from_boundary(&mut self) {
        let Some(bid) = self.boundary_out else { return };
        let mut i = 0;
        for port in self.external_ports.iter_mut().filter(|p| p.direction == Direction::Output) {
            if let Some(block) = self.blocks.get(bid).and_then(|b| b.as_ref()) {
                if let Some(src) = block.ports.get(i) {
                    copy_port(src, port);
                }
            }
            i += 1;
        }
    }

    /// Prepare every port's per-period state — each buffer's own `prepare()`
    /// plus the `set_scalar` pending-apply state machine (§4.2) — across
    /// this graph and every nested subgraph, recursively.
    ///
    /// This must run over the *whole* tree before `Executor::drain_events`
    /// applies this period's `SetPortValue`s: a mid-period value change
    /// writes its half-set split directly into the port's buffer and arms
    /// `ScalarPending::HalfSetCycle1`, meant to stay visible through this
    /// period's traversal and only collapse to a uniform buffer on the
    /// *next* period's prepare pass. Preparing before draining means the
    /// split survives until this period's blocks actually run; preparing
    /// after (as a combined "prepare then traverse" call would, if it also
    /// ran after the event had already landed) would flatten it in the same
    /// breath it was written, and no block would ever see it.
    pub fn prepare_ports(&mut self, nframes: usize) {
        if !self.enabled {
            return;
        }
        for block in self.blocks.iter_mut().flatten() {
            for port in block.ports.iter_mut() {
                port.prepare(nframes);
            }
            if let BlockKind::Graph(nested) = &mut block.kind {
                nested.prepare_ports(nframes);
            }
        }
        for port in self.external_ports.iter_mut() {
            port.prepare(nframes);
        }
    }

    /// Run one period: walk the installed `CompiledGraph` entry by entry
    /// (§4.7 step 3). Ports must already have been prepared this period via
    /// [`Graph::prepare_ports`] before this is called. Called by the
    /// `Executor` for the root graph and by `Block::run` for nested ones.
    pub fn run_period(&mut self, proc: &ProcInfo, host: &Host) {
        if !self.enabled {
            if !self.cleared_while_disabled {
                for port in self.external_ports.iter_mut().filter(|p| p.direction == Direction::Output) {
                    port.clear_buffers();
                }
                self.cleared_while_disabled = true;
            }
            return;
        }

        let Some(compiled) = self.compiled.take() else { return };

        for entry in compiled.entries.iter() {
            let mut by_port: FnvHashMap<usize, Vec<ConnectionId>> = FnvHashMap::default();
            for &cid in entry.incoming.iter() {
                if let Some(c) = self.connections[cid].as_ref() {
                    by_port.entry(c.dst_port).or_default().push(cid);
                }
            }

            for cids in by_port.values() {
                let multi = cids.len() > 1;
                for &cid in cids {
                    let conn_ref = self.connections[cid].as_ref().unwrap();
                    let (src_id, dst_id) = (conn_ref.src_block, conn_ref.dst_block);
                    let use_mix = conn_ref.needs_mix_buffer(multi);

                    // The sink's private mix buffer, if this entry needs
                    // one, was already allocated off the audio thread and
                    // installed by `Executor::execute` when the inbound
                    // connection count last changed (§4.7, §4.9) — this
                    // traversal only ever reads/writes it.
                    let (src, dst) = two_blocks_mut(&mut self.blocks, src_id, dst_id);
                    let conn = self.connections[cid].as_ref().unwrap();
                    conn.process(src, dst, proc.frames, use_mix);
                }
            }

            if let Some(block) = self.block_mut(entry.block) {
                block.run(proc, host);
            }
        }

        self.compiled = Some(compiled);
    }

}

/// Borrow two distinct blocks out of the slab mutably at once. Panics if
/// `a == b`, which never happens for a valid (acyclic) `CompiledGraph`
/// entry — a connection's source and destination are always different
/// blocks.
fn two_blocks_mut(blocks: &mut [Option<Block>], a: BlockId, b: BlockId) -> (&mut Block, &mut Block) {
    assert_ne!(a, b, "a connection's source and destination must differ");
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (left, right) = blocks.split_at_mut(hi);
    let lo_ref: &mut Block = left[lo].as_mut().expect("block exists");
    let hi_ref: &mut Block = right[0].as_mut().expect("block exists");
    if a < b {
        (lo_ref, hi_ref)
    } else {
        (hi_ref, lo_ref)
    }
}

/// Build a port mirroring `p`'s shape but owned by `owner` (a boundary
/// block) with `direction` flipped, per §4.14: the same symbol, reachable
/// at its own distinct path rather than aliasing `p`'s.
fn clone_port_shape(p: &Port, direction: Direction, owner: &Path) -> Port {
    let path = owner.child(&p.symbol).unwrap_or_else(|_| owner.clone());
    Port::new(path, p.symbol.clone(), p.index, direction, p.port_type, p.poly, p.buffer(0).capacity(), p.min, p.max)
}

/// Reads `src` through `effective_buffer` rather than its own raw buffer:
/// a bridge port fed by a multi-inbound or poly-to-mono connection (§3,
/// §4.4) holds its real data in the private mix buffer, never in the
/// port's own, so copying the latter across a graph boundary would carry
/// stale silence instead.
fn copy_port(src: &Port, dst: &mut Port) {
    let voices = src.voices().min(dst.voices());
    for v in 0..voices {
        let cap = src.effective_buffer(v).capacity().min(dst.buffer(v).capacity());
        dst.buffer_mut(v).copy(src.effective_buffer(v), 0, cap);
    }
}
