//! Path→object directory with reader/writer discipline (§4.11).
//!
//! Accessed only by the PreProcessor and PostProcessor threads, never by
//! the Executor: the Executor traverses the live tree through the
//! installed `CompiledGraph`, an immutable snapshot, and never needs path
//! lookups. A single `RwLock` is therefore enough — there is no
//! audio-thread contention to avoid.
//!
//! Besides the path directory itself, the `Store` mirrors just enough of
//! the live topology (child order, provider edges) for the PreProcessor to
//! run `compiler::compile_order` and catch `CycleDetected` *before*
//! queuing an event — without ever touching a live `Port`'s buffers.

use std::sync::RwLock;

use audiograph_core::PortType;
use fnv::FnvHashMap;

use crate::error::EngineError;
use crate::path::Path;
use crate::port::Direction;

/// What a path resolves to, with enough metadata for the PreProcessor to
/// validate a command (type/polyphony/direction checks) without touching
/// the live graph.
#[derive(Debug, Clone)]
pub enum ObjectRef {
    Graph { internal_poly: usize },
    Block { parent: Path, poly: usize, plugin_id: String },
    Port { block: Path, index: usize, port_type: PortType, direction: Direction, poly: usize, min: f64, max: f64 },
}

#[derive(Default)]
struct StoreInner {
    by_path: FnvHashMap<Path, ObjectRef>,
    /// Graph path -> child block paths, in insertion order.
    child_order: FnvHashMap<Path, Vec<Path>>,
    /// Sink port path -> source port paths feeding it. Port-granular so
    /// `DisconnectAll`/`Delete` can name the exact connections they cascade
    /// through; `providers()` reduces this to the block-level DAG
    /// `compiler::compile_order` needs.
    port_links: FnvHashMap<Path, Vec<Path>>,
}

pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self { inner: RwLock::new(StoreInner::default()) }
    }

    pub fn find(&self, path: &Path) -> Option<ObjectRef> {
        self.inner.read().unwrap().by_path.get(path).cloned()
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.inner.read().unwrap().by_path.contains_key(path)
    }

    pub fn add(&self, path: Path, obj: ObjectRef) -> Result<(), EngineError> {
        let mut inner = self.inner.write().unwrap();
        if inner.by_path.contains_key(&path) {
            return Err(EngineError::Exists(path));
        }
        inner.by_path.insert(path, obj);
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Option<ObjectRef> {
        let mut inner = self.inner.write().unwrap();
        let removed = inner.by_path.remove(path);
        if let Some(parent) = path.parent() {
            if let Some(children) = inner.child_order.get_mut(&parent) {
                children.retain(|c| c != path);
            }
        }
        inner.port_links.remove(path);
        for srcs in inner.port_links.values_mut() {
            srcs.retain(|p| p != path);
        }
        removed
    }

    /// Rename `old` to `new`, along with every descendant whose path
    /// starts with `old` (cascading, per §4.0's `starts_with`). Used by
    /// `Move` (§4.13).
    pub fn rename(&self, old: &Path, new: &Path) -> Result<(), EngineError> {
        let mut inner = self.inner.write().unwrap();
        if inner.by_path.contains_key(new) {
            return Err(EngineError::Exists(new.clone()));
        }
        if !inner.by_path.contains_key(old) {
            return Err(EngineError::NotFound(old.clone()));
        }

        let affected: Vec<Path> =
            inner.by_path.keys().filter(|p| p.starts_with(old)).cloned().collect();
        let rename_one = |p: &Path| -> Result<Path, EngineError> {
            let rest = &p.to_string()[old.to_string().len()..];
            Path::parse(&format!("{}{}", new, rest))
                .map_err(|e| EngineError::Internal(format!("rename produced an invalid path: {}", e)))
        };

        for path in &affected {
            let obj = inner.by_path.remove(path).unwrap();
            let renamed = rename_one(path)?;
            inner.by_path.insert(renamed, obj);
        }
        if let Some(children) = inner.child_order.remove(old) {
            let renamed_children =
                children.iter().map(rename_one).collect::<Result<Vec<_>, _>>()?;
            inner.child_order.insert(new.clone(), renamed_children);
        }
        if let Some(parent) = old.parent() {
            if let Some(siblings) = inner.child_order.get_mut(&parent) {
                for c in siblings.iter_mut() {
                    if c == old {
                        *c = new.clone();
                    }
                }
            }
        }
        let rebase_if_affected = |p: &Path| if p.starts_with(old) { p.rebase(old, new) } else { p.clone() };
        let mut rebased_links: FnvHashMap<Path, Vec<Path>> = FnvHashMap::default();
        for (dst, srcs) in inner.port_links.drain() {
            let new_dst = rebase_if_affected(&dst);
            let new_srcs = srcs.iter().map(rebase_if_affected).collect::<Vec<_>>();
            rebased_links.entry(new_dst).or_default().extend(new_srcs);
        }
        inner.port_links = rebased_links;
        Ok(())
    }

    /// All paths at or below `root`, used by cascading Delete (§4.13) to
    /// enumerate a subtree before detaching it.
    pub fn subtree(&self, root: &Path) -> Vec<Path> {
        let inner = self.inner.read().unwrap();
        inner.by_path.keys().filter(|p| p.starts_with(root)).cloned().collect()
    }

    /// Direct children of `parent` (one path segment deeper), regardless of
    /// kind. Used by `CreatePort`'s `prepare()` to assign a stable port
    /// index without the Store needing a dedicated port-list alongside
    /// `child_order`'s block-only list.
    pub fn direct_children(&self, parent: &Path) -> Vec<Path> {
        let inner = self.inner.read().unwrap();
        inner
            .by_path
            .keys()
            .filter(|p| p.parent().as_ref() == Some(parent))
            .cloned()
            .collect()
    }

    pub fn add_child(&self, parent: &Path, child: Path) {
        self.inner.write().unwrap().child_order.entry(parent.clone()).or_default().push(child);
    }

    pub fn child_order(&self, parent: &Path) -> Vec<Path> {
        self.inner.read().unwrap().child_order.get(parent).cloned().unwrap_or_default()
    }

    /// Record one `Connect` (§4.13): `src_port` feeds `dst_port`. Idempotent.
    pub fn connect(&self, src_port: Path, dst_port: Path) {
        let mut inner = self.inner.write().unwrap();
        let srcs = inner.port_links.entry(dst_port).or_default();
        if !srcs.contains(&src_port) {
            srcs.push(src_port);
        }
    }

    /// Undo one `Connect`. A no-op if the two ports were not linked.
    pub fn disconnect(&self, src_port: &Path, dst_port: &Path) {
        if let Some(srcs) = self.inner.write().unwrap().port_links.get_mut(dst_port) {
            srcs.retain(|p| p != src_port);
        }
    }

    /// The source ports currently feeding `dst_port`, in no particular
    /// order. Used to recompute a sink port's mix-buffer requirement (§3,
    /// §4.4) after a `Connect`/`Disconnect` changes its inbound count.
    pub fn sources_of(&self, dst_port: &Path) -> Vec<Path> {
        self.inner.read().unwrap().port_links.get(dst_port).cloned().unwrap_or_default()
    }

    /// Every `(src_port, dst_port)` pair touching `block` as either
    /// endpoint's owning block. Used by `DisconnectAll`/`Delete`'s cascade
    /// gathering (§4.13) to name the exact connections they tear down.
    pub fn port_links_touching(&self, block: &Path) -> Vec<(Path, Path)> {
        let inner = self.inner.read().unwrap();
        let owned_by_block = |p: &Path| p.parent().as_ref() == Some(block);
        inner
            .port_links
            .iter()
            .flat_map(|(dst, srcs)| {
                srcs.iter().filter(move |src| owned_by_block(src) || owned_by_block(dst)).map(move |src| (src.clone(), dst.clone()))
            })
            .collect()
    }

    /// Update a Graph's `internal_poly` in place (§4.5 `set_internal_poly`
    /// phase 1). A no-op if `path` is not a Graph.
    pub fn set_graph_poly(&self, path: &Path, poly: usize) {
        if let Some(ObjectRef::Graph { internal_poly }) = self.inner.write().unwrap().by_path.get_mut(path) {
            *internal_poly = poly;
        }
    }

    /// Update a Block's `poly` and all of its direct child Ports' `poly` in
    /// place, mirroring the voice count `prepare()` just re-instantiated
    /// the block's `Instance`s at. A no-op if `path` is not a Block.
    pub fn set_block_poly(&self, path: &Path, poly: usize) {
        let mut inner = self.inner.write().unwrap();
        if let Some(ObjectRef::Block { poly: p, .. }) = inner.by_path.get_mut(path) {
            *p = poly;
        } else {
            return;
        }
        for (child_path, obj) in inner.by_path.iter_mut() {
            if child_path.parent().as_ref() == Some(path) {
                if let ObjectRef::Port { poly: p, .. } = obj {
                    *p = poly;
                }
            }
        }
    }

    /// The block-level provider DAG `compiler::compile_order` needs,
    /// derived from the port-granular `port_links` by mapping each
    /// endpoint's port path back to its owning block.
    ///
    /// A port whose owner path names a Graph rather than a Block is a
    /// bridge endpoint (§3: a Graph's external ports double as internal
    /// bridge endpoints). Its data arrives or leaves outside the
    /// compiled traversal entirely, so it never constrains sibling
    /// ordering and is left out of the DAG.
    pub fn providers(&self) -> FnvHashMap<Path, Vec<Path>> {
        let inner = self.inner.read().unwrap();
        let is_graph = |p: &Path| matches!(inner.by_path.get(p), Some(ObjectRef::Graph { .. }));
        let mut result: FnvHashMap<Path, Vec<Path>> = FnvHashMap::default();
        for (dst_port, src_ports) in inner.port_links.iter() {
            let Some(dst_block) = dst_port.parent() else { continue };
            if is_graph(&dst_block) {
                continue;
            }
            for src_port in src_ports {
                let Some(src_block) = src_port.parent() else { continue };
                if is_graph(&src_block) {
                    continue;
                }
                let entry = result.entry(dst_block.clone()).or_default();
                if !entry.contains(&src_block) {
                    entry.push(src_block);
                }
            }
        }
        result
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
