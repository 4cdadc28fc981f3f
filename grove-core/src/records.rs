// SPDX-License-Identifier: MIT OR Apache-2.0

//! Records kept by the engine.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{GraftId, NodeId, Principal, Revision, ShareId, UserId};
use crate::rank::Rank;

/// Content of a node which can be searched and filtered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContent {
    pub text: String,
    pub tags: BTreeSet<String>,
}

impl NodeContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Returns `true` if the content carries the given tag, ignoring case.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|own| own.eq_ignore_ascii_case(tag))
    }
}

/// An item in the content tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub owner: Option<UserId>,
    pub parent: Option<NodeId>,

    /// Completion in the range `[0, 1]`.
    pub progress: f64,

    /// Position among the siblings below `parent`.
    pub sequence: u32,

    /// If set this node is a clone and defers progress and content to the origin node.
    pub origin: Option<NodeId>,

    pub content: NodeContent,
}

impl Node {
    pub fn new(id: NodeId, parent: Option<NodeId>, owner: Option<UserId>) -> Self {
        Self {
            id,
            owner,
            parent,
            progress: 0.0,
            sequence: 0,
            origin: None,
            content: NodeContent::default(),
        }
    }

    pub fn is_clone(&self) -> bool {
        self.origin.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Explicit permission grant on a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: ShareId,
    pub node: NodeId,
    pub principal: Principal,
    pub rank: Rank,
    pub granter: UserId,

    /// Revision of the mutation which last wrote this share.
    pub revision: Revision,
}

/// Virtual attachment presenting the subtree of `origin` as a child of `host`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graft {
    pub id: GraftId,
    pub host: NodeId,
    pub origin: NodeId,
    pub creator: Option<UserId>,

    /// Position among the children and grafts below `host`.
    pub sequence: u32,
}

/// Pair of nodes connected by real parent links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub ancestor: NodeId,
    pub descendant: NodeId,
    pub distance: u32,
}

/// Pair of nodes connected through exactly one graft.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualEdge {
    pub ancestor: NodeId,
    pub descendant: NodeId,
    pub distance: u32,
    pub graft: GraftId,
}

/// Materialised rank of a cache row.
///
/// `Blocked` is stored whenever the nearest share is an explicit `no_access` grant. A blocked row
/// is different from a missing row: it stops resolution from falling back to a public grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachedRank {
    Granted(Rank),
    Blocked,
}

impl CachedRank {
    pub fn rank(&self) -> Rank {
        match self {
            CachedRank::Granted(rank) => *rank,
            CachedRank::Blocked => Rank::NoAccess,
        }
    }
}

impl From<Rank> for CachedRank {
    fn from(rank: Rank) -> Self {
        if rank.grants_access() {
            CachedRank::Granted(rank)
        } else {
            CachedRank::Blocked
        }
    }
}

/// Row of the permission cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub node: NodeId,
    pub principal: Principal,
    pub rank: CachedRank,
    pub source: ShareId,
    pub revision: Revision,
}
