// SPDX-License-Identifier: MIT OR Apache-2.0

//! Answers "may this user do that on this node" from the permission cache.
use std::collections::BTreeSet;

use grove_core::{NodeId, Principal, Rank, UserId};

use crate::cache::nearest_share;
use crate::store::{InnerStore, MemoryStore, Sibling};

/// Returns `true` if `user` is recorded as owner of `node`. Unknown nodes and the public own
/// nothing.
fn owned_by(store: &InnerStore, node: NodeId, user: Option<UserId>) -> bool {
    match (user, store.nodes.get(&node)) {
        (Some(user), Some(record)) => record.owner == Some(user),
        _ => false,
    }
}

/// Effective rank read from the cache.
///
/// Clones are resolved to their origin first. Owners always hold `admin`. A present user row wins
/// over the public row, even when it is blocked or lower. Missing state counts as `no_access`.
pub(crate) fn cached_rank(store: &InnerStore, node: NodeId, user: Option<UserId>) -> Rank {
    let Some(origin) = store.resolve_origin(node) else {
        return Rank::NoAccess;
    };

    if owned_by(store, origin, user) {
        return Rank::Admin;
    }

    if let Some(user) = user {
        if let Some(entry) = store.cache.get(origin, Principal::User(user)) {
            return entry.rank.rank();
        }
    }

    store
        .cache
        .get(origin, Principal::Public)
        .map(|entry| entry.rank.rank())
        .unwrap_or_default()
}

/// Effective rank computed directly from shares and closure indexes, ignoring the cache.
pub(crate) fn strict_rank(store: &InnerStore, node: NodeId, user: Option<UserId>) -> Rank {
    let Some(origin) = store.resolve_origin(node) else {
        return Rank::NoAccess;
    };

    if owned_by(store, origin, user) {
        return Rank::Admin;
    }

    nearest_share(store, origin, Principal::from(user))
        .map(|share| share.rank)
        .unwrap_or_default()
}

/// Read-only permission checks.
///
/// `allowed` and `accessible_children` never block on background work and might briefly lag
/// behind the latest share changes. `allowed_strict` computes the answer from the authoritative
/// rows and is meant for checks which need to be exact within the same mutation.
#[derive(Clone, Debug)]
pub struct PermissionResolver {
    store: MemoryStore,
}

impl PermissionResolver {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Returns `true` if `user` (or the public for `None`) holds at least `required` on `node`.
    pub fn allowed(&self, node: NodeId, user: Option<UserId>, required: Rank) -> bool {
        let store = self.store.read_store();
        store.contains(node) && cached_rank(&store, node, user).satisfies(required)
    }

    /// Same contract as [`PermissionResolver::allowed`] without consulting the cache.
    pub fn allowed_strict(&self, node: NodeId, user: Option<UserId>, required: Rank) -> bool {
        let store = self.store.read_store();
        store.contains(node) && strict_rank(&store, node, user).satisfies(required)
    }

    pub fn effective_rank(&self, node: NodeId, user: Option<UserId>) -> Rank {
        cached_rank(&self.store.read_store(), node, user)
    }

    /// Displayed children of `parent` on which `user` holds at least `min_rank`, in display
    /// order. Grafts are listed by their origin.
    pub fn accessible_children(
        &self,
        parent: NodeId,
        user: Option<UserId>,
        min_rank: Rank,
    ) -> Vec<NodeId> {
        let store = self.store.read_store();
        let mut seen = BTreeSet::new();

        store
            .siblings(Some(parent))
            .into_iter()
            .filter_map(|sibling| match sibling {
                Sibling::Node(id) => Some(id),
                Sibling::Graft(graft) => store.overlay.get(graft).map(|graft| graft.origin),
            })
            .filter(|child| seen.insert(*child))
            .filter(|child| {
                // Direct ownership counts even when the child is a clone of a foreign node.
                owned_by(&store, *child, user)
                    || cached_rank(&store, *child, user).satisfies(min_rank)
            })
            .collect()
    }
}
