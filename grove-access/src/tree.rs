// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node lifecycle events reported by the content system.
use std::collections::BTreeSet;
use std::sync::Arc;

use grove_core::{Node, NodeContent, NodeId, UserId};
use tracing::debug;

use crate::error::{GroveError, ValidationError};
use crate::store::{InnerStore, MAX_CLONE_DEPTH, MemoryStore, Sibling};
use crate::tasks::Task;
use crate::traits::TaskQueue;

/// Summary of a cascading delete.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deleted {
    /// Removed nodes, the deleted node and all of its real descendants.
    pub nodes: Vec<NodeId>,
    pub shares: usize,
    pub grafts: usize,
    pub cache_rows: usize,

    /// Clones which pointed into the removed subtree and lost their origin.
    pub detached_clones: Vec<NodeId>,
}

/// Nodes are created and destroyed elsewhere, these entry points keep the indexes in step.
#[derive(Clone)]
pub struct Tree {
    store: MemoryStore,
    queue: Arc<dyn TaskQueue>,
}

impl Tree {
    pub fn new(store: MemoryStore, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.store.read_store().nodes.get(&id).cloned()
    }

    /// Entries displayed below `parent`, or the root nodes for `None`.
    pub fn siblings(&self, parent: Option<NodeId>) -> Vec<Sibling> {
        self.store.read_store().siblings(parent)
    }

    /// Register a new node as last child of `parent`.
    pub fn node_created(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
        owner: Option<UserId>,
    ) -> Result<Node, GroveError> {
        let (node, task) = {
            let mut guard = self.store.write_store();
            let store: &mut InnerStore = &mut guard;

            if store.contains(id) {
                return Err(ValidationError::DuplicateNode(id).into());
            }
            if let Some(parent) = parent {
                store.node(parent)?;
            }

            let sequence = store.siblings(parent).len() as u32;
            store.hierarchy.insert(id, parent)?;

            let mut node = Node::new(id, parent, owner);
            node.sequence = sequence;
            store.nodes.insert(id, node.clone());
            store.attach_child(parent, id);

            let virtual_edges = store
                .overlay
                .propagate_new_descendant(id, &store.hierarchy)
                .len();

            let revision = store.next_revision();
            debug!(node = %id, ?parent, sequence, virtual_edges, %revision, "node created");

            let task = Task::RebuildNodes {
                nodes: vec![id],
                revision,
            };
            (node, task)
        };

        self.queue.submit(task);
        Ok(node)
    }

    /// Remove a node together with its real subtree and everything referring to it.
    pub fn node_deleted(&self, id: NodeId) -> Result<Deleted, GroveError> {
        let (deleted, task) = {
            let mut guard = self.store.write_store();
            let store: &mut InnerStore = &mut guard;
            let parent = store.node(id)?.parent;

            // Nodes below a graft hosted in the subtree lose inherited shares as well, collect
            // them while the overlay still knows about them.
            let mut affected: BTreeSet<NodeId> = store
                .hierarchy
                .descendants(id)
                .flat_map(|(member, _)| store.overlay.descendants(member))
                .map(|(descendant, _, _)| descendant)
                .collect();

            let revision = store.next_revision();
            let removed = store.hierarchy.remove_subtree(id);
            let removed_set: BTreeSet<NodeId> = removed.iter().copied().collect();

            let dropped_grafts = store.overlay.remove_nodes(&removed);
            let shares = store.shares.remove_nodes(&removed).len();
            let cache_rows = store.cache.remove_nodes(&removed);

            for node in &removed {
                store.nodes.remove(node);
                store.children.remove(&Some(*node));
            }
            store.detach_child(parent, id);

            let mut detached_clones = Vec::new();
            for node in store.nodes.values_mut() {
                if node.origin.is_some_and(|origin| removed_set.contains(&origin)) {
                    node.origin = None;
                    detached_clones.push(node.id);
                }
            }
            detached_clones.sort();

            let mut hosts: BTreeSet<Option<NodeId>> = dropped_grafts
                .iter()
                .map(|graft| Some(graft.host))
                .filter(|host| host.is_some_and(|host| !removed_set.contains(&host)))
                .collect();
            hosts.insert(parent);
            for host in hosts {
                let order = store.siblings(host);
                store.renumber(&order);
            }

            affected.retain(|node| !removed_set.contains(node));

            let deleted = Deleted {
                nodes: removed,
                shares,
                grafts: dropped_grafts.len(),
                cache_rows,
                detached_clones,
            };
            debug!(
                node = %id,
                removed = deleted.nodes.len(),
                shares,
                grafts = deleted.grafts,
                cache_rows,
                %revision,
                "node deleted"
            );

            let task = (!affected.is_empty()).then(|| Task::RebuildNodes {
                nodes: affected.into_iter().collect(),
                revision,
            });
            (deleted, task)
        };

        if let Some(task) = task {
            self.queue.submit(task);
        }
        Ok(deleted)
    }

    pub fn set_progress(&self, id: NodeId, progress: f64) -> Result<(), GroveError> {
        if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
            return Err(ValidationError::InvalidProgress(progress).into());
        }

        let mut store = self.store.write_store();
        let node = store.node_mut(id)?;
        if node.is_clone() {
            return Err(ValidationError::CloneIsReadOnly(id).into());
        }
        node.progress = progress;
        let revision = store.next_revision();
        debug!(node = %id, progress, %revision, "set progress");
        Ok(())
    }

    pub fn set_content(&self, id: NodeId, content: NodeContent) -> Result<(), GroveError> {
        let mut store = self.store.write_store();
        let node = store.node_mut(id)?;
        if node.is_clone() {
            return Err(ValidationError::CloneIsReadOnly(id).into());
        }
        node.content = content;
        let revision = store.next_revision();
        debug!(node = %id, %revision, "set content");
        Ok(())
    }

    /// Turn `id` into a clone of `origin`, or back into a regular node for `None`.
    pub fn set_origin(&self, id: NodeId, origin: Option<NodeId>) -> Result<(), GroveError> {
        let mut store = self.store.write_store();
        store.node(id)?;

        if let Some(origin) = origin {
            if origin == id {
                return Err(ValidationError::CloneOfSelf(id).into());
            }
            store.node(origin)?;

            if store.clone_hops(origin, id).is_some() {
                return Err(ValidationError::CloneCycle { node: id, origin }.into());
            }

            // Clones of `id` get longer chains as well, every one of them must still resolve.
            let above = store
                .nodes
                .keys()
                .filter_map(|node| store.clone_hops(*node, id))
                .max()
                .unwrap_or(0);
            let depth = store
                .clone_depth(origin)
                .map(|below| above + 1 + below);
            if !depth.is_some_and(|depth| depth < MAX_CLONE_DEPTH) {
                return Err(ValidationError::CloneChainTooLong {
                    node: id,
                    origin,
                    max: MAX_CLONE_DEPTH,
                }
                .into());
            }
        }

        store.node_mut(id)?.origin = origin;
        let revision = store.next_revision();
        debug!(node = %id, ?origin, %revision, "set origin");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use grove_core::{NodeContent, NodeId, Principal, Rank, UserId};

    use crate::error::{GroveError, NotFoundError, ValidationError};
    use crate::store::{MAX_CLONE_DEPTH, Sibling};
    use crate::test_utils::TreeFixture;

    const OWNER: UserId = UserId::new(1);
    const ALICE: UserId = UserId::new(2);

    fn id(value: u64) -> NodeId {
        NodeId::new(value)
    }

    #[test]
    fn created_nodes_append_to_siblings() {
        let fixture = TreeFixture::new().node(1, None).node(2, Some(1)).node(3, Some(1));
        let tree = fixture.grove.tree();

        assert_eq!(tree.get(id(3)).unwrap().sequence, 1);
        assert_matches!(
            tree.node_created(id(2), None, None),
            Err(GroveError::Validation(ValidationError::DuplicateNode(_)))
        );
        assert_matches!(
            tree.node_created(id(4), Some(id(9)), None),
            Err(GroveError::NotFound(NotFoundError::Node(_)))
        );
        assert!(tree.get(id(4)).is_none());
    }

    #[test]
    fn new_nodes_inherit_shares() {
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .share(1, Some(ALICE), Rank::Write);
        let tree = fixture.grove.tree();

        tree.node_created(id(3), Some(id(2)), None).unwrap();
        assert!(fixture.grove.resolver().allowed(id(3), Some(ALICE), Rank::Write));
    }

    #[test]
    fn new_nodes_below_grafted_subtree() {
        // 1 -> 2,  10 -> 11, 11 grafted below 2
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(10, None)
            .node(11, Some(10))
            .graft(2, 11)
            .share(1, Some(ALICE), Rank::Read);
        let tree = fixture.grove.tree();

        tree.node_created(id(12), Some(id(11)), None).unwrap();
        assert!(fixture.grove.resolver().allowed(id(12), Some(ALICE), Rank::Read));
        assert!(!fixture.grove.resolver().allowed(id(10), Some(ALICE), Rank::Read));
    }

    #[test]
    fn delete_cascades() {
        // 1 -> 2 -> 3,  1 -> 4,  10 -> 11, 11 grafted below 3, 20 clone of 3
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(2))
            .node(4, Some(1))
            .node(10, None)
            .node(11, Some(10))
            .node(20, None)
            .graft(3, 11)
            .share(2, Some(ALICE), Rank::Write)
            .clone_of(20, 3);
        let tree = fixture.grove.tree();
        let resolver = fixture.grove.resolver();

        assert!(resolver.allowed(id(11), Some(ALICE), Rank::Write));

        let deleted = tree.node_deleted(id(2)).unwrap();
        assert_eq!(deleted.nodes, vec![id(2), id(3)]);
        assert_eq!(deleted.shares, 1);
        assert_eq!(deleted.grafts, 1);
        assert_eq!(deleted.detached_clones, vec![id(20)]);

        // Grafted subtree lost the share inherited through the removed host.
        assert!(!resolver.allowed(id(11), Some(ALICE), Rank::Read));
        assert_eq!(tree.siblings(Some(id(1))), vec![Sibling::Node(id(4))]);
        assert_eq!(tree.get(id(4)).unwrap().sequence, 0);
        assert!(!tree.get(id(20)).unwrap().is_clone());

        let store = fixture.grove.store().read_store();
        assert!(store.cache().rows_at(id(3)).next().is_none());
        assert!(store.cache().get(id(11), Principal::User(ALICE)).is_none());
        drop(store);

        fixture.grove.check_consistency().unwrap();
    }

    #[test]
    fn progress_and_content() {
        let fixture = TreeFixture::new().owned_node(1, None, OWNER).node(2, None).clone_of(2, 1);
        let tree = fixture.grove.tree();

        tree.set_progress(id(1), 0.5).unwrap();
        assert_matches!(
            tree.set_progress(id(1), 1.5),
            Err(GroveError::Validation(ValidationError::InvalidProgress(_)))
        );
        assert_matches!(
            tree.set_progress(id(1), f64::NAN),
            Err(GroveError::Validation(ValidationError::InvalidProgress(_)))
        );
        assert_matches!(
            tree.set_progress(id(2), 1.0),
            Err(GroveError::Validation(ValidationError::CloneIsReadOnly(_)))
        );
        assert_matches!(
            tree.set_content(id(2), NodeContent::new("nope")),
            Err(GroveError::Validation(ValidationError::CloneIsReadOnly(_)))
        );
        assert_eq!(tree.get(id(1)).unwrap().progress, 0.5);
    }

    #[test]
    fn clone_cycles() {
        let fixture = TreeFixture::new().node(1, None).node(2, None).node(3, None);
        let tree = fixture.grove.tree();

        assert_matches!(
            tree.set_origin(id(1), Some(id(1))),
            Err(GroveError::Validation(ValidationError::CloneOfSelf(_)))
        );

        tree.set_origin(id(2), Some(id(1))).unwrap();
        tree.set_origin(id(3), Some(id(2))).unwrap();
        assert_matches!(
            tree.set_origin(id(1), Some(id(3))),
            Err(GroveError::Validation(ValidationError::CloneCycle { .. }))
        );

        tree.set_origin(id(3), None).unwrap();
        tree.set_origin(id(1), Some(id(3))).unwrap();
    }

    #[test]
    fn clone_chains_stay_resolvable() {
        let last = MAX_CLONE_DEPTH as u64;
        let mut fixture = TreeFixture::new();
        for node in 1..=last + 1 {
            fixture = fixture.owned_node(node, None, OWNER);
        }
        fixture = fixture.node(100, None);
        for node in 2..=last {
            fixture = fixture.clone_of(node, node - 1);
        }
        let tree = fixture.grove.tree();
        let resolver = fixture.grove.resolver();

        // Longest accepted chain still resolves to the owned origin.
        assert!(resolver.allowed(id(last), Some(OWNER), Rank::Admin));
        assert!(resolver.allowed_strict(id(last), Some(OWNER), Rank::Admin));

        assert_matches!(
            tree.set_origin(id(last + 1), Some(id(last))),
            Err(GroveError::Validation(ValidationError::CloneChainTooLong { .. }))
        );

        // Extending the chain at its start lengthens it for every existing clone.
        assert_matches!(
            tree.set_origin(id(1), Some(id(100))),
            Err(GroveError::Validation(ValidationError::CloneChainTooLong { .. }))
        );
        assert!(!tree.get(id(1)).unwrap().is_clone());
        assert!(resolver.allowed(id(last), Some(OWNER), Rank::Admin));

        // Shortening the chain makes room again.
        tree.set_origin(id(last), None).unwrap();
        tree.set_origin(id(last + 1), Some(id(last - 1))).unwrap();
        assert!(resolver.allowed(id(last + 1), Some(OWNER), Rank::Admin));
    }
}
