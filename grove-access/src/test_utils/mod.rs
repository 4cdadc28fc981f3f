// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities.
use std::sync::Arc;

use grove_core::{NodeContent, NodeId, Principal, Rank, Share, UserId};

use crate::comments::CommentIndex;
use crate::grove::Grove;
use crate::store::InnerStore;

/// Granter recorded on shares written by [`TreeFixture`].
pub const FIXTURE_GRANTER: UserId = UserId::new(0);

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Builds trees on top of an inline grove, every step has fully converged when it returns.
///
/// Shares are written directly into the store, bypassing the admin check of
/// [`crate::ShareStore`].
pub struct TreeFixture {
    pub grove: Grove,
}

impl TreeFixture {
    pub fn new() -> Self {
        Self {
            grove: Grove::builder().build_inline(),
        }
    }

    pub fn with_comments(comments: Arc<CommentIndex>) -> Self {
        Self {
            grove: Grove::builder().comments(comments).build_inline(),
        }
    }

    pub fn node(self, id: u64, parent: Option<u64>) -> Self {
        self.create(id, parent, None)
    }

    pub fn owned_node(self, id: u64, parent: Option<u64>, owner: UserId) -> Self {
        self.create(id, parent, Some(owner))
    }

    pub fn share(self, node: u64, user: Option<UserId>, rank: Rank) -> Self {
        let principal = self.insert_share_without_propagation(node, user, rank);
        self.grove
            .cache()
            .rebuild_subtree(NodeId::new(node), principal)
            .unwrap();
        self
    }

    /// Present `origin` as last entry below `host`.
    pub fn graft(self, host: u64, origin: u64) -> Self {
        let host = NodeId::new(host);
        let position = self.grove.tree().siblings(Some(host)).len();
        self.grove
            .mutator()
            .create_graft(host, NodeId::new(origin), position, None)
            .unwrap();
        self
    }

    pub fn clone_of(self, node: u64, origin: u64) -> Self {
        self.grove
            .tree()
            .set_origin(NodeId::new(node), Some(NodeId::new(origin)))
            .unwrap();
        self
    }

    pub fn progress(self, node: u64, progress: f64) -> Self {
        self.grove
            .tree()
            .set_progress(NodeId::new(node), progress)
            .unwrap();
        self
    }

    pub fn content(self, node: u64, content: NodeContent) -> Self {
        self.grove
            .tree()
            .set_content(NodeId::new(node), content)
            .unwrap();
        self
    }

    /// Write a share row and leave the permission cache untouched.
    pub fn insert_share_without_propagation(
        &self,
        node: u64,
        user: Option<UserId>,
        rank: Rank,
    ) -> Principal {
        let node = NodeId::new(node);
        let principal = Principal::from(user);

        let mut guard = self.grove.store().write_store();
        let store: &mut InnerStore = &mut guard;
        let revision = store.next_revision();
        let existing = store.shares.find(node, principal).map(|share| share.id);
        let id = match existing {
            Some(id) => id,
            None => store.next_share_id(),
        };
        store.shares.insert(Share {
            id,
            node,
            principal,
            rank,
            granter: FIXTURE_GRANTER,
            revision,
        });
        principal
    }

    fn create(self, id: u64, parent: Option<u64>, owner: Option<UserId>) -> Self {
        self.grove
            .tree()
            .node_created(NodeId::new(id), parent.map(NodeId::new), owner)
            .unwrap();
        self
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}
