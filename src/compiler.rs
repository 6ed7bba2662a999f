//! Kahn-style topological sort producing a `CompiledGraph` (§4.6).
//!
//! Compilation is split across the two threads that together satisfy
//! §4.6 ("Compilation runs in the PreProcessor thread") and §4.11 ("the
//! Store is accessed only by PreProcessor and PostProcessor ... never by
//! the Executor"):
//!
//! - [`compile_order`] runs on the PreProcessor thread and sorts purely by
//!   `Path` against the Store's topology mirror — it never touches a live
//!   `Port`'s buffers, so it is free to run while the Executor still owns
//!   the previous `CompiledGraph`.
//! - [`resolve`] runs on the Executor thread, which has direct `&mut
//!   Graph` access at that moment, and turns the ordered `Vec<Path>` into
//!   concrete `BlockId`/`ConnectionId` indices.

use fnv::FnvHashMap;

use crate::block::BlockId;
use crate::connection::ConnectionId;
use crate::error::EngineError;
use crate::graph::Graph;
use crate::path::Path;

/// One step of the installed schedule: a block, plus the inbound
/// connections that must run immediately before it.
pub struct CompiledEntry {
    pub block: BlockId,
    pub incoming: Vec<ConnectionId>,
}

/// An immutable, topologically-ordered schedule for one `Graph` (§3).
/// Installed by a single pointer swap in the audio thread; never mutated
/// once built, only reclaimed.
pub struct CompiledGraph {
    pub entries: Vec<CompiledEntry>,
}

/// Produce a topological order over `child_order`, breaking ties by that
/// same child-insertion order (§4.6 determinism requirement). `providers`
/// maps each child to the children that feed it.
pub fn compile_order(
    child_order: &[Path],
    providers: &FnvHashMap<Path, Vec<Path>>,
) -> Result<Vec<Path>, EngineError> {
    let position: FnvHashMap<&Path, usize> =
        child_order.iter().enumerate().map(|(i, p)| (p, i)).collect();

    let mut indegree: FnvHashMap<&Path, usize> =
        child_order.iter().map(|p| (p, providers.get(p).map_or(0, |v| v.len()))).collect();

    let mut dependants: FnvHashMap<&Path, Vec<&Path>> = FnvHashMap::default();
    for (child, provs) in providers.iter() {
        for prov in provs {
            dependants.entry(prov).or_default().push(child);
        }
    }

    let mut queue: Vec<&Path> = child_order.iter().filter(|p| indegree[p] == 0).collect();
    let mut pos = 0;
    let mut order = Vec::with_capacity(child_order.len());

    while pos < queue.len() {
        let b = queue[pos];
        pos += 1;
        order.push(b.clone());

        if let Some(deps) = dependants.get(b) {
            for &d in deps {
                let count = indegree.get_mut(d).expect("dependant listed in child_order");
                *count -= 1;
                if *count == 0 && !queue[pos..].contains(&d) {
                    queue.push(d);
                }
            }
        }
        queue[pos..].sort_by_key(|p| position.get(p).copied().unwrap_or(usize::MAX));
    }

    if order.len() != child_order.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(order)
}

/// Turn a `Path`-ordered schedule into concrete `BlockId`/`ConnectionId`
/// indices against the live graph (Executor thread, §4.6).
///
/// `order` only names Store-tracked children (real plugin/internal/graph
/// blocks) — a graph's own boundary blocks (§4.14) never get a `Store` path,
/// so they never appear in it. A connection that feeds a real block from a
/// boundary block still resolves correctly (that block's own entry's
/// `incoming` list picks it up by `dst_block`), but a connection whose
/// *destination* is the boundary-out block itself — a graph wired straight
/// through from an external input to an external output with no child
/// blocks at all — would never be scheduled without one more step: append
/// a synthetic trailing entry for `boundary_out`, after every real block, so
/// its own inbound connections still get processed each period.
pub fn resolve(graph: &Graph, order: &[Path]) -> CompiledGraph {
    let mut entries = Vec::with_capacity(order.len() + 1);
    for path in order {
        let Some(block) = graph.find_block_by_path(path) else { continue };
        let incoming = graph
            .connection_ids()
            .filter(|&cid| graph.connection(cid).is_some_and(|c| c.dst_block == block))
            .collect();
        entries.push(CompiledEntry { block, incoming });
    }
    if let Some(boundary_out) = graph.boundary_out() {
        let incoming = graph
            .connection_ids()
            .filter(|&cid| graph.connection(cid).is_some_and(|c| c.dst_block == boundary_out))
            .collect();
        entries.push(CompiledEntry { block: boundary_out, incoming });
    }
    CompiledGraph { entries }
}
