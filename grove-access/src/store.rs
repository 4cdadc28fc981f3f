// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for nodes, shares, grafts and all derived indexes.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use grove_core::{GraftId, Node, NodeId, Revision, ShareId};
use serde::{Deserialize, Serialize};

use crate::cache::CacheTable;
use crate::error::NotFoundError;
use crate::hierarchy::HierarchyIndex;
use crate::overlay::GraftOverlay;
use crate::shares::ShareTable;

/// Longest chain of clone hops which still resolves to an origin.
pub const MAX_CLONE_DEPTH: usize = 64;

/// Entry of a sibling list: a real child or a graft presented below the same parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sibling {
    Node(NodeId),
    Graft(GraftId),
}

/// All tables of a grove.
///
/// Structural facts (nodes, shares, grafts) are authoritative, everything else is derived from
/// them. Derived closure indexes are kept in sync while the write lock is held, the permission
/// cache converges through background tasks.
#[derive(Clone, Debug, Default)]
pub struct InnerStore {
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) children: HashMap<Option<NodeId>, BTreeSet<NodeId>>,
    pub(crate) hierarchy: HierarchyIndex,
    pub(crate) overlay: GraftOverlay,
    pub(crate) shares: ShareTable,
    pub(crate) cache: CacheTable,
    revision: Revision,
    next_share: u64,
    next_graft: u64,
}

impl InnerStore {
    pub fn node(&self, id: NodeId) -> Result<&Node, NotFoundError> {
        self.nodes.get(&id).ok_or(NotFoundError::Node(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, NotFoundError> {
        self.nodes.get_mut(&id).ok_or(NotFoundError::Node(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn hierarchy(&self) -> &HierarchyIndex {
        &self.hierarchy
    }

    pub fn overlay(&self) -> &GraftOverlay {
        &self.overlay
    }

    pub fn shares(&self) -> &ShareTable {
        &self.shares
    }

    pub fn cache(&self) -> &CacheTable {
        &self.cache
    }

    /// Revision of the latest committed mutation.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub(crate) fn next_revision(&mut self) -> Revision {
        self.revision = self.revision.next();
        self.revision
    }

    pub(crate) fn next_share_id(&mut self) -> ShareId {
        self.next_share += 1;
        ShareId::new(self.next_share)
    }

    pub(crate) fn next_graft_id(&mut self) -> GraftId {
        self.next_graft += 1;
        GraftId::new(self.next_graft)
    }

    /// Follow clone origins until reaching the node which holds the content.
    ///
    /// Returns `None` for unknown nodes or broken chains.
    pub fn resolve_origin(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        for _ in 0..MAX_CLONE_DEPTH {
            let node = self.nodes.get(&current)?;
            match node.origin {
                Some(origin) => current = origin,
                None => return Some(current),
            }
        }
        None
    }

    /// Number of clone hops from `id` to the node holding its content.
    pub(crate) fn clone_depth(&self, id: NodeId) -> Option<usize> {
        let mut current = id;
        for hops in 0..MAX_CLONE_DEPTH {
            match self.nodes.get(&current)?.origin {
                Some(origin) => current = origin,
                None => return Some(hops),
            }
        }
        None
    }

    /// Number of clone hops from `from` to `to`, `None` if `to` is not on the origin chain.
    pub(crate) fn clone_hops(&self, from: NodeId, to: NodeId) -> Option<usize> {
        let mut current = from;
        for hops in 0..MAX_CLONE_DEPTH {
            if current == to {
                return Some(hops);
            }
            current = self.nodes.get(&current)?.origin?;
        }
        None
    }

    /// Node holding the content of `id` after resolving clones.
    pub fn authoritative(&self, id: NodeId) -> Option<&Node> {
        self.resolve_origin(id).and_then(|origin| self.nodes.get(&origin))
    }

    /// Real children of `parent`, or all root nodes for `None`.
    pub fn children_of(&self, parent: Option<NodeId>) -> impl Iterator<Item = NodeId> + '_ {
        self.children.get(&parent).into_iter().flatten().copied()
    }

    /// Real children and grafts below `parent` in display order.
    pub fn siblings(&self, parent: Option<NodeId>) -> Vec<Sibling> {
        let mut entries: Vec<(u32, Sibling)> = self
            .children_of(parent)
            .filter_map(|id| {
                self.nodes
                    .get(&id)
                    .map(|node| (node.sequence, Sibling::Node(id)))
            })
            .collect();

        if let Some(host) = parent {
            entries.extend(
                self.overlay
                    .hosted_by(host)
                    .map(|graft| (graft.sequence, Sibling::Graft(graft.id))),
            );
        }

        entries.sort();
        entries.into_iter().map(|(_, sibling)| sibling).collect()
    }

    /// Assign dense, zero-based sequence numbers following the given order.
    pub(crate) fn renumber(&mut self, order: &[Sibling]) {
        for (position, sibling) in order.iter().enumerate() {
            let sequence = position as u32;
            match sibling {
                Sibling::Node(id) => {
                    if let Some(node) = self.nodes.get_mut(id) {
                        node.sequence = sequence;
                    }
                }
                Sibling::Graft(id) => {
                    if let Some(graft) = self.overlay.get_mut(*id) {
                        graft.sequence = sequence;
                    }
                }
            }
        }
    }

    pub(crate) fn attach_child(&mut self, parent: Option<NodeId>, child: NodeId) {
        self.children.entry(parent).or_default().insert(child);
    }

    pub(crate) fn detach_child(&mut self, parent: Option<NodeId>, child: NodeId) {
        if let Some(children) = self.children.get_mut(&parent) {
            children.remove(&child);
            if children.is_empty() {
                self.children.remove(&parent);
            }
        }
    }

    /// Real and virtual ancestors of `node` with the shortest distance to each, `node` itself
    /// included at distance `0`.
    pub fn combined_ancestors(&self, node: NodeId) -> HashMap<NodeId, u32> {
        let mut ancestors: HashMap<NodeId, u32> = self.hierarchy.ancestors(node).collect();
        for (ancestor, distance, _) in self.overlay.ancestors(node) {
            ancestors
                .entry(ancestor)
                .and_modify(|known| *known = (*known).min(distance))
                .or_insert(distance);
        }
        ancestors
    }

    /// Real and virtual descendants of `node` with the shortest distance to each, `node` itself
    /// included at distance `0`.
    pub fn combined_descendants(&self, node: NodeId) -> HashMap<NodeId, u32> {
        let mut descendants: HashMap<NodeId, u32> = self.hierarchy.descendants(node).collect();
        for (descendant, distance, _) in self.overlay.descendants(node) {
            descendants
                .entry(descendant)
                .and_modify(|known| *known = (*known).min(distance))
                .or_insert(distance);
        }
        descendants
    }
}

/// Shared handle on the tables of a grove.
///
/// `MemoryStore` supports usage in asynchronous and multi-threaded contexts by wrapping an
/// `InnerStore` with an `RwLock` and `Arc`. Every multi-row mutation runs under a single write
/// lock, which makes it atomic and serialises mutations touching overlapping subtrees.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<InnerStore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a read-lock on the store.
    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerStore> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerStore> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }
}

#[cfg(test)]
mod tests {
    use grove_core::{Node, NodeId};

    use super::{InnerStore, Sibling};

    fn id(value: u64) -> NodeId {
        NodeId::new(value)
    }

    fn add(store: &mut InnerStore, node: u64, parent: Option<u64>, sequence: u32) {
        let mut record = Node::new(id(node), parent.map(id), None);
        record.sequence = sequence;
        store.hierarchy.insert(id(node), parent.map(id)).unwrap();
        store.nodes.insert(id(node), record);
        store.attach_child(parent.map(id), id(node));
    }

    #[test]
    fn siblings_by_sequence_then_id() {
        let mut store = InnerStore::default();
        add(&mut store, 1, None, 0);
        add(&mut store, 4, Some(1), 1);
        add(&mut store, 3, Some(1), 1);
        add(&mut store, 2, Some(1), 0);

        assert_eq!(
            store.siblings(Some(id(1))),
            vec![
                Sibling::Node(id(2)),
                Sibling::Node(id(3)),
                Sibling::Node(id(4))
            ]
        );

        let order = store.siblings(Some(id(1)));
        store.renumber(&order);
        assert_eq!(store.node(id(4)).unwrap().sequence, 2);
    }

    #[test]
    fn resolve_clone_chain() {
        let mut store = InnerStore::default();
        add(&mut store, 1, None, 0);
        add(&mut store, 2, None, 1);
        add(&mut store, 3, None, 2);
        store.node_mut(id(3)).unwrap().origin = Some(id(2));
        store.node_mut(id(2)).unwrap().origin = Some(id(1));

        assert_eq!(store.resolve_origin(id(3)), Some(id(1)));
        assert_eq!(store.resolve_origin(id(1)), Some(id(1)));
        assert_eq!(store.resolve_origin(id(9)), None);

        // A corrupted chain resolves to nothing instead of looping forever.
        store.node_mut(id(1)).unwrap().origin = Some(id(3));
        assert_eq!(store.resolve_origin(id(3)), None);
    }
}
