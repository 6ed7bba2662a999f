//! Path-based navigation through the live graph tree.
//!
//! The `Store` (§4.11) mirrors topology for the PreProcessor, but the
//! Executor mutates the real tree of `Graph`/`Block`/`Port` values directly,
//! reached only by walking down from the root `Graph` through nested
//! `BlockKind::Graph` blocks (§3: "its external ports appear twice
//! logically"). These helpers do that walk; every event's `execute()`
//! (§4.13) goes through them rather than holding its own cached pointers,
//! since the tree may have been rearranged by an intervening `Move`.

use crate::block::{Block, BlockId, BlockKind};
use crate::graph::Graph;
use crate::path::Path;
use crate::port::Port;

/// The `Graph` identified by `path`, whether that's `root` itself or a
/// nested nested subgraph reached through a `Graph`-kind `Block`.
pub fn find_graph_mut<'a>(root: &'a mut Graph, path: &Path) -> Option<&'a mut Graph> {
    if *path == root.path {
        return Some(root);
    }
    let parent_path = path.parent()?;
    let parent = find_graph_mut(root, &parent_path)?;
    let id = parent.find_block_by_path(path)?;
    match &mut parent.block_mut(id)?.kind {
        BlockKind::Graph(g) => Some(g.as_mut()),
        _ => None,
    }
}

pub fn find_graph<'a>(root: &'a Graph, path: &Path) -> Option<&'a Graph> {
    if *path == root.path {
        return Some(root);
    }
    let parent_path = path.parent()?;
    let parent = find_graph(root, &parent_path)?;
    let id = parent.find_block_by_path(path)?;
    match &parent.block(id)?.kind {
        BlockKind::Graph(g) => Some(g.as_ref()),
        _ => None,
    }
}

/// The `Block` at `path`: its parent must resolve to a live `Graph`.
pub fn find_block_mut<'a>(root: &'a mut Graph, path: &Path) -> Option<&'a mut Block> {
    let parent_path = path.parent()?;
    let parent = find_graph_mut(root, &parent_path)?;
    let id = parent.find_block_by_path(path)?;
    parent.block_mut(id)
}

pub fn find_block<'a>(root: &'a Graph, path: &Path) -> Option<&'a Block> {
    let parent_path = path.parent()?;
    let parent = find_graph(root, &parent_path)?;
    let id = parent.find_block_by_path(path)?;
    parent.block(id)
}

pub fn find_block_id(root: &Graph, path: &Path) -> Option<BlockId> {
    let parent_path = path.parent()?;
    let parent = find_graph(root, &parent_path)?;
    parent.find_block_by_path(path)
}

/// The `Port` at `path`: its parent path is the owning block's path, its
/// symbol the port's own symbol (§3 data model).
///
/// A nested graph's own external ports are reached through its wrapping
/// `Block` (whose `.ports` is what `Block::run` actually keeps live, §4.14),
/// so that's tried first. Only the root graph has no wrapping `Block` at
/// all — its external ports live solely in `Graph::external_ports`, synced
/// against the `AudioBackend` rather than copied through a parent — so a
/// root-owned path falls back to looking there.
pub fn find_port_mut<'a>(root: &'a mut Graph, path: &Path) -> Option<&'a mut Port> {
    let owner_path = path.parent()?;
    let symbol = path.symbol()?;
    if let Some(block) = find_block_mut(root, &owner_path) {
        return block.ports.iter_mut().find(|p| p.symbol == symbol);
    }
    let graph = find_graph_mut(root, &owner_path)?;
    graph.external_ports_owned_mut().iter_mut().find(|p| p.symbol == symbol)
}

pub fn find_port<'a>(root: &'a Graph, path: &Path) -> Option<&'a Port> {
    let owner_path = path.parent()?;
    let symbol = path.symbol()?;
    if let Some(block) = find_block(root, &owner_path) {
        return block.ports.iter().find(|p| p.symbol == symbol);
    }
    let graph = find_graph(root, &owner_path)?;
    graph.external_ports().iter().find(|p| p.symbol == symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_blocks::InternalBlock;
    use crate::port::Direction;
    use audiograph_core::PortType;

    #[test]
    fn finds_nested_block_and_port() {
        let mut root = Graph::new_root(Path::root(), 1);
        let nested = Graph::new_nested(Path::parse("/g").unwrap(), 1, Vec::new());
        let gb = Block::new(Path::parse("/g").unwrap(), "g".into(), 1, Vec::new(), BlockKind::Graph(Box::new(nested)));
        root.add_block(gb);

        let inner = find_graph_mut(&mut root, &Path::parse("/g").unwrap()).unwrap();
        let port = Port::new(Path::parse("/g/a/out").unwrap(), "out".into(), 0, Direction::Output, PortType::Audio, 1, 4, 0.0, 1.0);
        let a = Block::new(Path::parse("/g/a").unwrap(), "a".into(), 1, vec![port], BlockKind::Internal(InternalBlock::AudioOut));
        inner.add_block(a);

        assert!(find_block(&root, &Path::parse("/g/a").unwrap()).is_some());
        assert!(find_port(&root, &Path::parse("/g/a/out").unwrap()).is_some());
    }
}
