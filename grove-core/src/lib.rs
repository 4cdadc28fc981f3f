// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data types shared by every layer of a grove: identifiers, the ordered permission [`Rank`]
//! and the plain records which are stored and indexed by `grove-access`.
//!
//! Nothing in this crate performs any I/O or holds locks, all types are cheap to clone and
//! serialize with `serde`.
pub mod ids;
pub mod rank;
pub mod records;

pub use ids::{GraftId, IdError, NodeId, Principal, Revision, ShareId, UserId};
pub use rank::{Rank, RankError};
pub use records::{
    CacheEntry, CachedRank, Graft, HierarchyEdge, Node, NodeContent, Share, VirtualEdge,
};
