// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit permission grants and the entry points writing them.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use grove_core::{NodeId, Principal, Rank, Share, ShareId, UserId};
use tracing::debug;

use crate::error::{GroveError, NotFoundError, ValidationError};
use crate::resolver::strict_rank;
use crate::store::{InnerStore, MemoryStore};
use crate::tasks::Task;
use crate::traits::TaskQueue;

/// At most one share per `(node, principal)`.
#[derive(Clone, Debug, Default)]
pub struct ShareTable {
    rows: HashMap<ShareId, Share>,
    by_key: HashMap<(NodeId, Principal), ShareId>,
    by_node: HashMap<NodeId, BTreeSet<ShareId>>,
}

impl ShareTable {
    pub fn get(&self, id: ShareId) -> Option<&Share> {
        self.rows.get(&id)
    }

    pub fn find(&self, node: NodeId, principal: Principal) -> Option<&Share> {
        self.by_key
            .get(&(node, principal))
            .and_then(|id| self.rows.get(id))
    }

    /// Shares placed directly on `node`.
    pub fn on_node(&self, node: NodeId) -> impl Iterator<Item = &Share> {
        self.by_node
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Share> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert a share or replace the share with the same id.
    pub(crate) fn insert(&mut self, share: Share) {
        self.by_key.insert((share.node, share.principal), share.id);
        self.by_node.entry(share.node).or_default().insert(share.id);
        self.rows.insert(share.id, share);
    }

    pub(crate) fn remove(&mut self, id: ShareId) -> Option<Share> {
        let share = self.rows.remove(&id)?;
        self.by_key.remove(&(share.node, share.principal));
        if let Some(ids) = self.by_node.get_mut(&share.node) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_node.remove(&share.node);
            }
        }
        Some(share)
    }

    /// Drop every share placed on one of the given nodes.
    pub(crate) fn remove_nodes(&mut self, nodes: &[NodeId]) -> Vec<Share> {
        let ids: Vec<ShareId> = nodes
            .iter()
            .filter_map(|node| self.by_node.get(node))
            .flatten()
            .copied()
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Owners and admins may manage the shares of a node.
fn authorise(store: &InnerStore, node: NodeId, granter: UserId) -> Result<(), ValidationError> {
    if strict_rank(store, node, Some(granter)).satisfies(Rank::Admin) {
        Ok(())
    } else {
        Err(ValidationError::InsufficientAccess {
            user: granter,
            node,
            required: Rank::Admin,
        })
    }
}

/// Entry points for granting, changing and revoking shares.
///
/// The share row is committed synchronously, the permission cache of the affected subtree is
/// brought up to date by a background task.
#[derive(Clone)]
pub struct ShareStore {
    store: MemoryStore,
    queue: Arc<dyn TaskQueue>,
}

impl ShareStore {
    pub fn new(store: MemoryStore, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Grant `rank` on `node` to `user`, or to the public for `None`.
    ///
    /// Fails with [`ValidationError::DuplicateShare`] if the principal already holds a share on
    /// that node.
    pub fn create(
        &self,
        node: NodeId,
        user: Option<UserId>,
        rank: Rank,
        granter: UserId,
    ) -> Result<Share, GroveError> {
        self.write(node, user, rank, granter, false)
    }

    /// Grant `rank` on `node`, replacing the rank of an existing share for the same principal.
    pub fn upsert(
        &self,
        node: NodeId,
        user: Option<UserId>,
        rank: Rank,
        granter: UserId,
    ) -> Result<Share, GroveError> {
        self.write(node, user, rank, granter, true)
    }

    /// Like [`ShareStore::upsert`] for ranks arriving in their numeric form.
    pub fn upsert_raw(
        &self,
        node: NodeId,
        user: Option<UserId>,
        rank: u8,
        granter: UserId,
    ) -> Result<Share, GroveError> {
        let rank = Rank::try_from(rank)?;
        self.upsert(node, user, rank, granter)
    }

    /// Delete a share. Nodes which inherited from it fall back to the next nearest share.
    pub fn revoke(&self, id: ShareId) -> Result<Share, GroveError> {
        let (share, task) = {
            let mut store = self.store.write_store();
            let share = store.shares.remove(id).ok_or(NotFoundError::Share(id))?;
            let revision = store.next_revision();
            debug!(
                share = %share.id,
                node = %share.node,
                principal = %share.principal,
                %revision,
                "revoke share"
            );

            let task = Task::RebuildSubtree {
                root: share.node,
                principal: share.principal,
                revision,
            };
            (share, task)
        };

        self.queue.submit(task);
        Ok(share)
    }

    pub fn get(&self, id: ShareId) -> Option<Share> {
        self.store.read_store().shares.get(id).cloned()
    }

    /// Explicit shares placed on `node`.
    pub fn shares_for(&self, node: NodeId) -> Vec<Share> {
        let store = self.store.read_store();
        let mut shares: Vec<Share> = store.shares.on_node(node).cloned().collect();
        shares.sort_by_key(|share| share.principal);
        shares
    }

    fn write(
        &self,
        node: NodeId,
        user: Option<UserId>,
        rank: Rank,
        granter: UserId,
        replace: bool,
    ) -> Result<Share, GroveError> {
        let principal = Principal::from(user);

        let (share, task) = {
            let mut store = self.store.write_store();
            store.node(node)?;
            authorise(&store, node, granter)?;

            let existing = store.shares.find(node, principal).map(|share| share.id);
            if existing.is_some() && !replace {
                return Err(ValidationError::DuplicateShare { node, principal }.into());
            }

            let revision = store.next_revision();
            let id = match existing {
                Some(id) => id,
                None => store.next_share_id(),
            };
            let share = Share {
                id,
                node,
                principal,
                rank,
                granter,
                revision,
            };
            store.shares.insert(share.clone());
            debug!(share = %id, %node, %principal, %rank, %revision, "write share");

            let task = Task::RebuildSubtree {
                root: node,
                principal,
                revision,
            };
            (share, task)
        };

        self.queue.submit(task);
        Ok(share)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use grove_core::{NodeId, Principal, Rank, RankError, UserId};

    use crate::error::{GroveError, NotFoundError, ValidationError};
    use crate::test_utils::TreeFixture;

    const OWNER: UserId = UserId::new(1);
    const ALICE: UserId = UserId::new(2);
    const BOB: UserId = UserId::new(3);

    fn id(value: u64) -> NodeId {
        NodeId::new(value)
    }

    fn tree() -> TreeFixture {
        // 1 -> 2 -> 3
        TreeFixture::new()
            .owned_node(1, None, OWNER)
            .owned_node(2, Some(1), OWNER)
            .owned_node(3, Some(2), OWNER)
    }

    #[test]
    fn create_rejects_duplicates() {
        let fixture = tree();
        let shares = fixture.grove.shares();

        shares.create(id(2), Some(ALICE), Rank::Read, OWNER).unwrap();
        assert_matches!(
            shares.create(id(2), Some(ALICE), Rank::Write, OWNER),
            Err(GroveError::Validation(ValidationError::DuplicateShare { principal, .. }))
                if principal == Principal::User(ALICE)
        );

        let updated = shares.upsert(id(2), Some(ALICE), Rank::Write, OWNER).unwrap();
        assert_eq!(updated.rank, Rank::Write);
        assert_eq!(shares.shares_for(id(2)).len(), 1);
    }

    #[test]
    fn granter_needs_admin() {
        let fixture = tree();
        let shares = fixture.grove.shares();

        assert_matches!(
            shares.upsert(id(2), Some(BOB), Rank::Read, ALICE),
            Err(GroveError::Validation(ValidationError::InsufficientAccess { .. }))
        );

        // Alice becomes admin of the subtree and may share further down.
        shares.upsert(id(2), Some(ALICE), Rank::Admin, OWNER).unwrap();
        shares.upsert(id(3), Some(BOB), Rank::Read, ALICE).unwrap();

        // Write is not enough.
        shares.upsert(id(2), Some(BOB), Rank::Write, ALICE).unwrap();
        assert_matches!(
            shares.upsert(id(2), None, Rank::Read, BOB),
            Err(GroveError::Validation(ValidationError::InsufficientAccess { .. }))
        );
    }

    #[test]
    fn invalid_inputs() {
        let fixture = tree();
        let shares = fixture.grove.shares();

        assert_matches!(
            shares.upsert_raw(id(1), None, 7, OWNER),
            Err(GroveError::Validation(ValidationError::InvalidRank(RankError::OutOfRange(7))))
        );
        assert_matches!(
            shares.upsert(id(9), None, Rank::Read, OWNER),
            Err(GroveError::NotFound(NotFoundError::Node(_)))
        );
        assert!(shares.shares_for(id(1)).is_empty());
    }

    #[test]
    fn revoke_falls_back_to_next_share() {
        let fixture = tree();
        let shares = fixture.grove.shares();
        let resolver = fixture.grove.resolver();

        shares.upsert(id(1), Some(ALICE), Rank::Read, OWNER).unwrap();
        let nearer = shares.upsert(id(2), Some(ALICE), Rank::Write, OWNER).unwrap();
        assert_eq!(resolver.effective_rank(id(3), Some(ALICE)), Rank::Write);

        shares.revoke(nearer.id).unwrap();
        assert_eq!(resolver.effective_rank(id(3), Some(ALICE)), Rank::Read);

        assert_matches!(
            shares.revoke(nearer.id),
            Err(GroveError::NotFound(NotFoundError::Share(_)))
        );
    }

    #[test]
    fn no_access_blocks_farther_grants() {
        let fixture = tree();
        let shares = fixture.grove.shares();
        let resolver = fixture.grove.resolver();

        shares.upsert(id(1), None, Rank::Write, OWNER).unwrap();
        shares.upsert(id(1), Some(ALICE), Rank::Admin, OWNER).unwrap();
        shares.upsert(id(2), Some(ALICE), Rank::NoAccess, OWNER).unwrap();

        assert!(resolver.allowed(id(1), Some(ALICE), Rank::Admin));
        assert!(!resolver.allowed(id(2), Some(ALICE), Rank::Read));
        assert!(!resolver.allowed(id(3), Some(ALICE), Rank::Read));
        assert!(resolver.allowed(id(3), Some(BOB), Rank::Write));

        // Lifting the block restores the inherited grant.
        shares.upsert(id(2), Some(ALICE), Rank::Read, OWNER).unwrap();
        assert_eq!(resolver.effective_rank(id(3), Some(ALICE)), Rank::Read);
    }
}
