// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural changes: moving nodes, grafting subtrees and reordering siblings.
//!
//! Every operation validates first and only then touches any row, all under one write lock. A
//! rejected request therefore leaves all indexes exactly as they were.
use std::collections::BTreeSet;
use std::sync::Arc;

use grove_core::{Graft, GraftId, NodeId, UserId};
use tracing::debug;

use crate::error::{GroveError, NotFoundError, ValidationError};
use crate::store::{InnerStore, MemoryStore, Sibling};
use crate::tasks::Task;
use crate::traits::TaskQueue;

fn check_position(position: usize, len: usize) -> Result<(), ValidationError> {
    if position > len {
        Err(ValidationError::InvalidPosition { position, len })
    } else {
        Ok(())
    }
}

/// Real descendants of `origin`, the nodes whose virtual ancestors change with a graft.
fn origin_subtree(store: &InnerStore, origin: NodeId) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = store
        .hierarchy
        .descendants(origin)
        .map(|(node, _)| node)
        .collect();
    nodes.sort();
    nodes
}

#[derive(Clone)]
pub struct HierarchyMutator {
    store: MemoryStore,
    queue: Arc<dyn TaskQueue>,
}

impl HierarchyMutator {
    pub fn new(store: MemoryStore, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Move `node` with its subtree below `new_parent` (root level for `None`) at `position`
    /// among the new siblings.
    ///
    /// The new parent must neither be the node itself nor displayed anywhere below it, through
    /// real children or grafts.
    pub fn move_node(
        &self,
        node: NodeId,
        new_parent: Option<NodeId>,
        position: usize,
    ) -> Result<(), GroveError> {
        let task = {
            let mut guard = self.store.write_store();
            let store: &mut InnerStore = &mut guard;

            let old_parent = store.node(node)?.parent;
            if let Some(parent) = new_parent {
                store.node(parent)?;
                if store.overlay.reaches(node, parent, &store.hierarchy) {
                    return Err(ValidationError::MoveCycle { node, parent }.into());
                }
            }

            let mut order: Vec<Sibling> = store
                .siblings(new_parent)
                .into_iter()
                .filter(|sibling| *sibling != Sibling::Node(node))
                .collect();
            check_position(position, order.len())?;

            let summary = store.hierarchy.reparent(node, new_parent)?;
            let revision = store.next_revision();

            // Edges are still indexed at their previous position here, this recovers grafts
            // which exposed the subtree before the move.
            let grafts = store
                .overlay
                .affected_by_move(node, &summary.subtree, &store.hierarchy);

            let mut affected: BTreeSet<NodeId> = summary.subtree.iter().copied().collect();
            for graft in &grafts {
                if let Some(graft) = store.overlay.get(*graft) {
                    affected.extend(origin_subtree(store, graft.origin));
                }
            }
            store.overlay.recompute(grafts.iter().copied(), &store.hierarchy);

            store.node_mut(node)?.parent = new_parent;
            store.detach_child(old_parent, node);
            store.attach_child(new_parent, node);

            if old_parent != new_parent {
                let previous = store.siblings(old_parent);
                store.renumber(&previous);
            }
            order.insert(position, Sibling::Node(node));
            store.renumber(&order);

            debug!(
                %node,
                ?old_parent,
                ?new_parent,
                position,
                moved = summary.subtree.len(),
                grafts = grafts.len(),
                %revision,
                "move node"
            );

            Task::RebuildNodes {
                nodes: affected.into_iter().collect(),
                revision,
            }
        };

        self.queue.submit(task);
        Ok(())
    }

    /// Present the subtree of `origin` below `host` at `position` among its children and grafts.
    pub fn create_graft(
        &self,
        host: NodeId,
        origin: NodeId,
        position: usize,
        creator: Option<UserId>,
    ) -> Result<Graft, GroveError> {
        let (graft, task) = {
            let mut guard = self.store.write_store();
            let store: &mut InnerStore = &mut guard;

            store.node(host)?;
            store.node(origin)?;
            store.overlay.validate(host, origin, &store.hierarchy)?;

            let mut order = store.siblings(Some(host));
            check_position(position, order.len())?;

            let graft = Graft {
                id: store.next_graft_id(),
                host,
                origin,
                creator,
                sequence: position as u32,
            };
            let edges = store.overlay.add_graft(graft.clone(), &store.hierarchy)?;
            let revision = store.next_revision();

            order.insert(position, Sibling::Graft(graft.id));
            store.renumber(&order);

            debug!(graft = %graft.id, %host, %origin, position, edges, %revision, "create graft");

            let task = Task::RebuildNodes {
                nodes: origin_subtree(store, origin),
                revision,
            };
            (graft, task)
        };

        self.queue.submit(task);
        Ok(graft)
    }

    pub fn remove_graft(&self, id: GraftId) -> Result<Graft, GroveError> {
        let (graft, task) = {
            let mut guard = self.store.write_store();
            let store: &mut InnerStore = &mut guard;

            let graft = store.overlay.remove_graft(id).ok_or(NotFoundError::Graft(id))?;
            let revision = store.next_revision();

            let order = store.siblings(Some(graft.host));
            store.renumber(&order);

            debug!(graft = %id, host = %graft.host, origin = %graft.origin, %revision, "remove graft");

            let task = Task::RebuildNodes {
                nodes: origin_subtree(store, graft.origin),
                revision,
            };
            (graft, task)
        };

        self.queue.submit(task);
        Ok(graft)
    }

    /// Replace the order of all entries below `parent`. `entries` must list every current child
    /// and graft exactly once.
    pub fn reorder(&self, parent: Option<NodeId>, entries: &[Sibling]) -> Result<(), GroveError> {
        let mut store = self.store.write_store();
        if let Some(parent) = parent {
            store.node(parent)?;
        }

        let mut current = store.siblings(parent);
        current.sort();
        let mut requested = entries.to_vec();
        requested.sort();
        if current != requested {
            return Err(ValidationError::InvalidReorder(parent).into());
        }

        store.renumber(entries);
        let revision = store.next_revision();
        debug!(?parent, entries = entries.len(), %revision, "reorder siblings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use grove_core::{GraftId, NodeId, Rank, UserId};

    use crate::error::{GroveError, NotFoundError, ValidationError};
    use crate::store::Sibling;
    use crate::test_utils::TreeFixture;

    const ALICE: UserId = UserId::new(2);

    fn id(value: u64) -> NodeId {
        NodeId::new(value)
    }

    /// 1 -> 2 -> 3
    ///   -> 4
    /// 10 -> 11
    fn fixture() -> TreeFixture {
        TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(2))
            .node(4, Some(1))
            .node(10, None)
            .node(11, Some(10))
    }

    fn edge_count(fixture: &TreeFixture) -> (usize, usize) {
        let store = fixture.grove.store().read_store();
        (store.hierarchy().edges().count(), store.overlay().edges().count())
    }

    #[test]
    fn move_renumbers_both_lists() {
        let fixture = fixture();
        let mutator = fixture.grove.mutator();
        let tree = fixture.grove.tree();

        // Move 4 to the front of 2's children.
        mutator.move_node(id(4), Some(id(2)), 0).unwrap();

        assert_eq!(tree.siblings(Some(id(1))), vec![Sibling::Node(id(2))]);
        assert_eq!(
            tree.siblings(Some(id(2))),
            vec![Sibling::Node(id(4)), Sibling::Node(id(3))]
        );
        assert_eq!(tree.get(id(3)).unwrap().sequence, 1);
        assert_eq!(tree.get(id(4)).unwrap().parent, Some(id(2)));

        // Root level.
        mutator.move_node(id(2), None, 1).unwrap();
        assert_eq!(
            tree.siblings(None),
            vec![Sibling::Node(id(1)), Sibling::Node(id(2)), Sibling::Node(id(10))]
        );
        fixture.grove.check_consistency().unwrap();
    }

    #[test]
    fn move_carries_permissions() {
        let fixture = fixture().share(10, Some(ALICE), Rank::Write);
        let mutator = fixture.grove.mutator();
        let resolver = fixture.grove.resolver();

        assert!(!resolver.allowed(id(3), Some(ALICE), Rank::Read));
        mutator.move_node(id(2), Some(id(11)), 0).unwrap();
        assert!(resolver.allowed(id(3), Some(ALICE), Rank::Write));

        mutator.move_node(id(2), Some(id(1)), 0).unwrap();
        assert!(!resolver.allowed(id(3), Some(ALICE), Rank::Read));
        fixture.grove.check_consistency().unwrap();
    }

    #[test]
    fn reject_cycles_without_changes() {
        let fixture = fixture().graft(3, 10);
        let mutator = fixture.grove.mutator();
        let before = edge_count(&fixture);

        assert_matches!(
            mutator.move_node(id(1), Some(id(3)), 0),
            Err(GroveError::Validation(ValidationError::MoveCycle { .. }))
        );
        assert_matches!(
            mutator.move_node(id(1), Some(id(1)), 0),
            Err(GroveError::Validation(ValidationError::MoveCycle { .. }))
        );

        // 11 is a virtual descendant of 1.
        assert_matches!(
            mutator.move_node(id(1), Some(id(11)), 0),
            Err(GroveError::Validation(ValidationError::MoveCycle { .. }))
        );

        assert_matches!(
            mutator.create_graft(id(3), id(1), 0, None),
            Err(GroveError::Validation(ValidationError::GraftCycle { .. }))
        );
        assert_matches!(
            mutator.create_graft(id(11), id(2), 0, None),
            Err(GroveError::Validation(ValidationError::GraftCycle { .. }))
        );
        assert_matches!(
            mutator.create_graft(id(2), id(10), 0, None),
            Err(GroveError::Validation(ValidationError::DuplicateGraft { .. }))
        );
        assert_matches!(
            mutator.move_node(id(4), Some(id(2)), 5),
            Err(GroveError::Validation(ValidationError::InvalidPosition { position: 5, len: 1 }))
        );

        assert_eq!(edge_count(&fixture), before);
        fixture.grove.check_consistency().unwrap();
    }

    #[test]
    fn grafts_share_the_sibling_order() {
        let fixture = fixture();
        let mutator = fixture.grove.mutator();
        let tree = fixture.grove.tree();

        let graft = mutator.create_graft(id(1), id(11), 1, None).unwrap();
        assert_eq!(
            tree.siblings(Some(id(1))),
            vec![
                Sibling::Node(id(2)),
                Sibling::Graft(graft.id),
                Sibling::Node(id(4))
            ]
        );
        assert_eq!(tree.get(id(4)).unwrap().sequence, 2);

        mutator.remove_graft(graft.id).unwrap();
        assert_eq!(tree.get(id(4)).unwrap().sequence, 1);
        assert_matches!(
            mutator.remove_graft(graft.id),
            Err(GroveError::NotFound(NotFoundError::Graft(_)))
        );
        assert_matches!(
            mutator.remove_graft(GraftId::new(99)),
            Err(GroveError::NotFound(NotFoundError::Graft(_)))
        );
    }

    #[test]
    fn graft_removal_revokes_inherited_access() {
        let fixture = fixture().share(1, Some(ALICE), Rank::Feedback);
        let mutator = fixture.grove.mutator();
        let resolver = fixture.grove.resolver();

        let graft = mutator.create_graft(id(4), id(10), 0, None).unwrap();
        assert_eq!(resolver.effective_rank(id(11), Some(ALICE)), Rank::Feedback);

        mutator.remove_graft(graft.id).unwrap();
        assert_eq!(resolver.effective_rank(id(11), Some(ALICE)), Rank::NoAccess);
        fixture.grove.check_consistency().unwrap();
    }

    #[test]
    fn reorder_requires_permutation() {
        let fixture = fixture();
        let mutator = fixture.grove.mutator();
        let tree = fixture.grove.tree();

        let graft = mutator.create_graft(id(1), id(10), 2, None).unwrap();
        let order = vec![
            Sibling::Graft(graft.id),
            Sibling::Node(id(4)),
            Sibling::Node(id(2)),
        ];
        mutator.reorder(Some(id(1)), &order).unwrap();
        assert_eq!(tree.siblings(Some(id(1))), order);

        assert_matches!(
            mutator.reorder(Some(id(1)), &[Sibling::Node(id(4)), Sibling::Node(id(2))]),
            Err(GroveError::Validation(ValidationError::InvalidReorder(_)))
        );
        assert_matches!(
            mutator.reorder(
                Some(id(1)),
                &[Sibling::Node(id(4)), Sibling::Node(id(4)), Sibling::Node(id(2))]
            ),
            Err(GroveError::Validation(ValidationError::InvalidReorder(_)))
        );
        assert_eq!(tree.siblings(Some(id(1))), order);
    }
}
