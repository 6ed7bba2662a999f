//! Plugin-instance wrapper with ports and per-voice state (§4.3).

use smallvec::SmallVec;

use audiograph_core::{Host, Instance, PortType, ProcBuffers, ProcInfo};

use crate::graph::Graph;
use crate::internal_blocks::InternalBlock;
use crate::path::Path;
use crate::port::{Direction, Port};

pub type BlockId = usize;

pub enum BlockKind {
    /// Wraps an external plugin: one `Instance` per voice.
    Plugin { instances: Vec<Instance> },
    /// A built-in primitive (§4.14); no `Instance`, no activate/deactivate
    /// beyond the block's own lifecycle.
    Internal(InternalBlock),
    /// A nested subgraph. `Block::ports` holds this block's external
    /// (parent-facing) bridge ports; the graph's own boundary blocks
    /// (§4.14 `AudioIn`/`AudioOut` etc.) hold the matching internal-facing
    /// ports and are kept in sync by `Block::run`.
    Graph(Box<Graph>),
}

pub struct Block {
    pub path: Path,
    pub symbol: String,
    pub poly: usize,
    pub ports: Vec<Port>,
    pub kind: BlockKind,

    /// Maintained by the Compiler (§4.6): blocks that feed this one.
    pub providers: Vec<BlockId>,
    /// Maintained by the Compiler: blocks fed by this one.
    pub dependants: Vec<BlockId>,

    active: bool,
}

impl Block {
    pub fn new(path: Path, symbol: String, poly: usize, ports: Vec<Port>, kind: BlockKind) -> Self {
        Self {
            path,
            symbol,
            poly,
            ports,
            kind,
            providers: Vec::new(),
            dependants: Vec::new(),
            active: false,
        }
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == Direction::Input)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.direction == Direction::Output)
    }

    pub fn port_index_by_symbol(&self, symbol: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.symbol == symbol)
    }

    /// `[main-thread or audio-thread]`: activates every voice's underlying
    /// plugin instance, or recurses into a nested graph.
    pub fn activate(&mut self) {
        if self.active {
            return;
        }
        if let BlockKind::Plugin { instances } = &mut self.kind {
            for inst in instances.iter_mut() {
                if let Some(audio_thread) = inst.audio_thread.as_mut() {
                    let _ = audio_thread.start_processing();
                }
            }
        }
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        if let BlockKind::Plugin { instances } = &mut self.kind {
            for inst in instances.iter_mut() {
                if let Some(audio_thread) = inst.audio_thread.as_mut() {
                    audio_thread.stop_processing();
                }
            }
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Process `end - start` frames for every voice (§4.3). Preconditions:
    /// every input port has been populated by the Executor's traversal
    /// (via inbound `Connection::process`); postcondition: every output
    /// port's buffer holds this period's output.
    pub fn run(&mut self, proc: &ProcInfo, host: &Host) {
        match &mut self.kind {
            BlockKind::Internal(internal) => {
                internal.run(proc, &mut self.ports);
            }
            BlockKind::Graph(graph) => {
                for (i, p) in self.ports.iter().enumerate().filter(|(_, p)| p.direction == Direction::Input) {
                    graph.copy_into_boundary_in(i, p);
                }
                graph.run_period(proc, host);
                for (i, p) in self.ports.iter_mut().enumerate().filter(|(_, p)| p.direction == Direction::Output) {
                    graph.copy_from_boundary_out(i, p);
                }
            }
            BlockKind::Plugin { instances } => {
                let n_inputs = self.ports.iter().filter(|p| p.direction == Direction::Input).count();

                for (voice, inst) in instances.iter_mut().enumerate() {
                    let Some(audio_thread) = inst.audio_thread.as_mut() else { continue };

                    let mut audio_in = SmallVec::new();
                    let mut event_in = SmallVec::new();
                    let mut audio_out = SmallVec::new();
                    let mut event_out = SmallVec::new();

                    // Split the port list into immutable input refs and
                    // mutable output refs without aliasing: inputs are a
                    // strict prefix by construction (§3: "inputs then
                    // outputs, stable by index").
                    let (ins, outs) = self.ports.split_at_mut(n_inputs);

                    for p in ins.iter() {
                        let v = voice.min(p.voices() - 1);
                        match p.port_type {
                            PortType::Sequence => event_in.push(p.effective_buffer(v)),
                            _ => audio_in.push(p.effective_buffer(v)),
                        }
                    }
                    for p in outs.iter_mut() {
                        let v = voice.min(p.voices() - 1);
                        match p.port_type {
                            PortType::Sequence => event_out.push(p.buffer_mut(v)),
                            _ => audio_out.push(p.buffer_mut(v)),
                        }
                    }

                    let mut buffers = ProcBuffers { audio_in, audio_out, event_in, event_out };
                    let _ = audio_thread.process(proc, &mut buffers, host);
                }
            }
        }
    }
}
