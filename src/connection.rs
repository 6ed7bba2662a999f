//! Directed link between a source port and a sink port with mixing policy
//! (§3, §4.4).

use crate::block::{Block, BlockId};

pub type ConnectionId = usize;

/// Per-voice routing policy, derived once when the connection is created
/// from the source and sink ports' polyphony (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Mono source -> mono sink: sink voice 0 reads source voice 0.
    MonoToMono,
    /// Poly source -> poly sink of equal polyphony: voice i reads voice i.
    PolyToPoly,
    /// Mono source -> poly sink: every sink voice reads source voice 0.
    MonoToPoly,
    /// Poly source -> mono sink: source voices are summed into a private
    /// mix buffer before the sink block runs.
    PolyToMono,
}

pub struct Connection {
    pub src_block: BlockId,
    pub src_port: usize,
    pub dst_block: BlockId,
    pub dst_port: usize,
    pub routing: RoutingPolicy,
    pub pending_disconnect: bool,
}

impl Connection {
    pub fn new(
        src_block: BlockId,
        src_port: usize,
        src_poly: usize,
        dst_block: BlockId,
        dst_port: usize,
        dst_poly: usize,
    ) -> Self {
        let routing = routing_for(src_poly, dst_poly);
        Self { src_block, src_port, dst_block, dst_port, routing, pending_disconnect: false }
    }

    /// Recompute `routing` after either endpoint's polyphony has changed
    /// (§4.5 `set_internal_poly`): the connection's identity (which ports
    /// it joins) is unaffected, only how voices are routed between them.
    pub fn update_routing(&mut self, src_poly: usize, dst_poly: usize) {
        self.routing = routing_for(src_poly, dst_poly);
    }

    /// True whenever this connection's sink write must land in the sink
    /// port's private mix buffer rather than its own buffer: a poly source
    /// summed into a mono sink always needs one (§3), and the caller
    /// (`Graph::run_period`, which knows the full inbound-connection count
    /// for this port from the `CompiledGraph` entry) forces one whenever
    /// the port has more than one inbound connection.
    pub fn needs_mix_buffer(&self, multiple_inbound: bool) -> bool {
        multiple_inbound || matches!(self.routing, RoutingPolicy::PolyToMono)
    }

    /// Route the source voice(s) into the sink port. When `use_mix` is
    /// true this accumulates into the sink's private mix buffer (the
    /// caller has already cleared it once this period, before the first
    /// inbound connection runs); otherwise it copies straight into the
    /// sink's own buffer.
    pub fn process(&self, src: &Block, dst: &mut Block, nframes: usize, use_mix: bool) {
        let src_voices = src.ports[self.src_port].voices();
        let dst_voices = dst.ports[self.dst_port].voices();

        match self.routing {
            RoutingPolicy::MonoToMono => write_voice(src, self.src_port, 0, dst, self.dst_port, 0, nframes, use_mix),
            RoutingPolicy::PolyToPoly => {
                for v in 0..dst_voices {
                    write_voice(src, self.src_port, v, dst, self.dst_port, v, nframes, use_mix);
                }
            }
            RoutingPolicy::MonoToPoly => {
                for v in 0..dst_voices {
                    write_voice(src, self.src_port, 0, dst, self.dst_port, v, nframes, use_mix);
                }
            }
            RoutingPolicy::PolyToMono => {
                for v in 0..src_voices {
                    // A poly source always accumulates into the mono
                    // sink's mix buffer, even when it is this
                    // connection's only inbound link.
                    write_voice(src, self.src_port, v, dst, self.dst_port, 0, nframes, true);
                }
            }
        }
    }
}

fn routing_for(src_poly: usize, dst_poly: usize) -> RoutingPolicy {
    match (src_poly, dst_poly) {
        (1, 1) => RoutingPolicy::MonoToMono,
        (1, _) => RoutingPolicy::MonoToPoly,
        (_, 1) => RoutingPolicy::PolyToMono,
        _ => RoutingPolicy::PolyToPoly,
    }
}

fn write_voice(
    src: &Block,
    src_port_idx: usize,
    src_voice: usize,
    dst: &mut Block,
    dst_port_idx: usize,
    dst_voice: usize,
    nframes: usize,
    use_mix: bool,
) {
    let src_buf = src.ports[src_port_idx].buffer(src_voice);
    let dst_port = &mut dst.ports[dst_port_idx];
    if use_mix {
        dst_port.mix_buffer_mut(dst_voice).mix(src_buf, 0, nframes);
    } else {
        dst_port.buffer_mut(dst_voice).copy(src_buf, 0, nframes);
    }
}
