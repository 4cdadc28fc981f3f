// SPDX-License-Identifier: MIT OR Apache-2.0

//! Materialised effective permissions per `(node, principal)`.
//!
//! A public row `(n, Public)` mirrors the nearest public share reachable from `n`. A user row
//! `(n, User(u))` only exists when the nearest share among the ones for `u` and the public ones
//! is a share for `u`. Distances are measured over the real tree and the graft overlay together,
//! at equal distance a user share wins over a public one and a higher rank over a lower one.
//!
//! Explicit `no_access` grants are kept as `CachedRank::Blocked` rows, which keeps "blocked" and
//! "never granted" apart: resolution falls back to the public row only when no user row exists.
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use grove_core::{CacheEntry, NodeId, Principal, Revision, Share, ShareId};
use tracing::{debug, trace};

use crate::error::NotFoundError;
use crate::store::{InnerStore, MemoryStore};

/// Outcome of recomputing a single cache row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowUpdate {
    /// Row was inserted or its rank or source changed.
    Written,

    /// Row was deleted.
    Removed,

    /// Row already held the computed value.
    Unchanged,

    /// Row was written by a newer revision and left untouched.
    Outdated,
}

impl RowUpdate {
    pub fn is_change(&self) -> bool {
        matches!(self, RowUpdate::Written | RowUpdate::Removed)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CacheTable {
    rows: HashMap<NodeId, HashMap<Principal, CacheEntry>>,
    by_source: HashMap<ShareId, BTreeSet<(NodeId, Principal)>>,
}

impl CacheTable {
    pub fn get(&self, node: NodeId, principal: Principal) -> Option<&CacheEntry> {
        self.rows.get(&node).and_then(|rows| rows.get(&principal))
    }

    /// All rows of one node.
    pub fn rows_at(&self, node: NodeId) -> impl Iterator<Item = &CacheEntry> {
        self.rows.get(&node).into_iter().flat_map(|rows| rows.values())
    }

    /// Keys of all rows currently derived from `share`.
    pub fn derived_from(&self, share: ShareId) -> impl Iterator<Item = (NodeId, Principal)> + '_ {
        self.by_source.get(&share).into_iter().flatten().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.rows.values().flat_map(|rows| rows.values())
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bring the row `(node, principal)` to the desired state unless a newer revision wrote it.
    pub(crate) fn apply(
        &mut self,
        node: NodeId,
        principal: Principal,
        desired: Option<CacheEntry>,
        revision: Revision,
    ) -> RowUpdate {
        let current = self.get(node, principal);
        if let Some(current) = current {
            if current.revision > revision {
                return RowUpdate::Outdated;
            }
        }

        match desired {
            Some(entry) => {
                let update = match current {
                    Some(current)
                        if current.rank == entry.rank && current.source == entry.source =>
                    {
                        RowUpdate::Unchanged
                    }
                    _ => RowUpdate::Written,
                };
                self.insert(entry);
                update
            }
            None => match self.remove(node, principal) {
                Some(_) => RowUpdate::Removed,
                None => RowUpdate::Unchanged,
            },
        }
    }

    /// Drop every row of the given nodes regardless of revision.
    pub(crate) fn remove_nodes(&mut self, nodes: &[NodeId]) -> usize {
        let mut removed = 0;
        for node in nodes {
            let Some(rows) = self.rows.remove(node) else {
                continue;
            };
            for entry in rows.values() {
                self.unlink_source(entry);
            }
            removed += rows.len();
        }
        removed
    }

    fn insert(&mut self, entry: CacheEntry) {
        if let Some(previous) = self
            .rows
            .entry(entry.node)
            .or_default()
            .insert(entry.principal, entry.clone())
        {
            self.unlink_source(&previous);
        }
        self.by_source
            .entry(entry.source)
            .or_default()
            .insert((entry.node, entry.principal));
    }

    fn remove(&mut self, node: NodeId, principal: Principal) -> Option<CacheEntry> {
        let rows = self.rows.get_mut(&node)?;
        let entry = rows.remove(&principal)?;
        if rows.is_empty() {
            self.rows.remove(&node);
        }
        self.unlink_source(&entry);
        Some(entry)
    }

    fn unlink_source(&mut self, entry: &CacheEntry) {
        if let Some(keys) = self.by_source.get_mut(&entry.source) {
            keys.remove(&(entry.node, entry.principal));
            if keys.is_empty() {
                self.by_source.remove(&entry.source);
            }
        }
    }
}

/// Nearest share deciding the effective rank of `principal` on `node`.
///
/// For a user both their own shares and public shares compete, the result may therefore be a
/// public share.
pub(crate) fn nearest_share(
    store: &InnerStore,
    node: NodeId,
    principal: Principal,
) -> Option<&Share> {
    let ancestors = store.combined_ancestors(node);

    ancestors
        .iter()
        .flat_map(|(ancestor, distance)| {
            let own = match principal {
                Principal::User(_) => store.shares.find(*ancestor, principal),
                Principal::Public => None,
            };
            let public = store.shares.find(*ancestor, Principal::Public);
            own.into_iter()
                .chain(public)
                .map(move |share| (*distance, share))
        })
        .min_by_key(|(distance, share)| {
            (
                *distance,
                share.principal.is_public(),
                Reverse(share.rank),
                share.id,
            )
        })
        .map(|(_, share)| share)
}

/// Row `(node, principal)` should hold after convergence, `None` if it should not exist.
pub(crate) fn compute_entry(
    store: &InnerStore,
    node: NodeId,
    principal: Principal,
    revision: Revision,
) -> Option<CacheEntry> {
    nearest_share(store, node, principal)
        .filter(|share| share.principal == principal)
        .map(|share| CacheEntry {
            node,
            principal,
            rank: share.rank.into(),
            source: share.id,
            revision,
        })
}

/// Every principal which might own a row at `node`: the public, all users holding a share on
/// one of its ancestors and all users which currently have a row there.
pub(crate) fn relevant_principals(store: &InnerStore, node: NodeId) -> BTreeSet<Principal> {
    let mut principals = BTreeSet::from([Principal::Public]);
    for ancestor in store.combined_ancestors(node).into_keys() {
        principals.extend(store.shares.on_node(ancestor).map(|share| share.principal));
    }
    principals.extend(store.cache.rows_at(node).map(|entry| entry.principal));
    principals
}

pub(crate) fn rebuild_row(
    store: &mut InnerStore,
    node: NodeId,
    principal: Principal,
    revision: Revision,
) -> RowUpdate {
    let desired = compute_entry(store, node, principal, revision);
    let update = store.cache.apply(node, principal, desired, revision);
    trace!(%node, %principal, %revision, ?update, "rebuild cache row");
    update
}

/// Rebuild the rows of `principal` on `node`. Public changes can create or remove user rows as
/// well, for the public all relevant principals are rebuilt.
fn rebuild_for(
    store: &mut InnerStore,
    node: NodeId,
    principal: Principal,
    revision: Revision,
) -> usize {
    let principals = match principal {
        Principal::Public => relevant_principals(store, node),
        Principal::User(_) => BTreeSet::from([principal]),
    };

    principals
        .into_iter()
        .map(|principal| rebuild_row(store, node, principal, revision))
        .filter(RowUpdate::is_change)
        .count()
}

/// Handle on the permission cache of a store.
///
/// Rebuilds always recompute from shares and closure indexes, they never depend on the previous
/// content of the cache and are safe to repeat.
#[derive(Clone, Debug)]
pub struct PermissionCache {
    store: MemoryStore,
    chunk_size: usize,
}

impl PermissionCache {
    pub fn new(store: MemoryStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn get(&self, node: NodeId, principal: Principal) -> Option<CacheEntry> {
        self.store.read_store().cache.get(node, principal).cloned()
    }

    /// Number of rows in the cache.
    pub fn len(&self) -> usize {
        self.store.read_store().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read_store().cache.is_empty()
    }

    /// Recompute a single row.
    pub fn rebuild(&self, node: NodeId, principal: Principal) -> Result<RowUpdate, NotFoundError> {
        let mut store = self.store.write_store();
        store.node(node)?;
        let revision = store.revision();
        Ok(rebuild_row(&mut store, node, principal, revision))
    }

    /// Recompute the rows of `principal` on `root` and all its real and virtual descendants.
    /// Returns the number of changed rows.
    pub fn rebuild_subtree(&self, root: NodeId, principal: Principal) -> Result<usize, NotFoundError> {
        let revision = {
            let store = self.store.read_store();
            store.node(root)?;
            store.revision()
        };
        Ok(self.rebuild_subtree_at(root, principal, revision))
    }

    /// Recompute the rows of every relevant principal on the given nodes.
    pub fn rebuild_nodes(&self, nodes: &[NodeId]) -> usize {
        let revision = self.store.read_store().revision();
        self.rebuild_nodes_at(nodes, revision)
    }

    /// Recompute the whole table.
    ///
    /// Rows of nodes which do not exist anymore are dropped. This walks every node and is meant
    /// for populating a fresh cache, not for the request path.
    pub fn backfill(&self) -> usize {
        let revision = self.store.read_store().revision();
        self.backfill_at(revision)
    }

    pub(crate) fn rebuild_subtree_at(
        &self,
        root: NodeId,
        principal: Principal,
        revision: Revision,
    ) -> usize {
        let mut nodes: Vec<NodeId> = {
            let store = self.store.read_store();
            if !store.contains(root) {
                return 0;
            }
            store.combined_descendants(root).into_keys().collect()
        };
        nodes.sort();

        let mut changed = 0;
        for chunk in nodes.chunks(self.chunk_size) {
            let mut store = self.store.write_store();
            for node in chunk {
                if store.contains(*node) {
                    changed += rebuild_for(&mut store, *node, principal, revision);
                }
            }
        }

        debug!(%root, %principal, %revision, nodes = nodes.len(), changed, "rebuilt subtree");
        changed
    }

    pub(crate) fn rebuild_nodes_at(&self, nodes: &[NodeId], revision: Revision) -> usize {
        let mut changed = 0;
        for chunk in nodes.chunks(self.chunk_size) {
            let mut store = self.store.write_store();
            for node in chunk {
                if store.contains(*node) {
                    changed += rebuild_for(&mut store, *node, Principal::Public, revision);
                }
            }
        }

        debug!(%revision, nodes = nodes.len(), changed, "rebuilt nodes");
        changed
    }

    pub(crate) fn backfill_at(&self, revision: Revision) -> usize {
        let (mut nodes, orphaned): (Vec<NodeId>, Vec<NodeId>) = {
            let store = self.store.read_store();
            let nodes = store.nodes.keys().copied().collect();
            let orphaned = store
                .cache
                .iter()
                .map(|entry| entry.node)
                .filter(|node| !store.contains(*node))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            (nodes, orphaned)
        };
        nodes.sort();

        let dropped = self.store.write_store().cache.remove_nodes(&orphaned);
        let changed = self.rebuild_nodes_at(&nodes, revision);
        debug!(%revision, changed, dropped, "backfilled permission cache");
        changed + dropped
    }
}
