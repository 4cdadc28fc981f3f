// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

use grove_core::{GraftId, NodeId, Principal, Rank, RankError, Revision, ShareId, UserId};
use thiserror::Error;

/// Request was rejected before anything was written.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("moving {node} below {parent} would create a cycle")]
    MoveCycle { node: NodeId, parent: NodeId },

    #[error("grafting {origin} below {host} would create a cycle")]
    GraftCycle { host: NodeId, origin: NodeId },

    #[error("{origin} is already grafted below {host}")]
    DuplicateGraft { host: NodeId, origin: NodeId },

    #[error("a share for {principal} on {node} already exists")]
    DuplicateShare { node: NodeId, principal: Principal },

    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error(transparent)]
    InvalidRank(#[from] RankError),

    #[error("progress {0} is outside of the range [0, 1]")]
    InvalidProgress(f64),

    #[error("node {0} can not be a clone of itself")]
    CloneOfSelf(NodeId),

    #[error("making {node} a clone of {origin} would create a clone cycle")]
    CloneCycle { node: NodeId, origin: NodeId },

    #[error("making {node} a clone of {origin} exceeds the limit of {max} clone hops")]
    CloneChainTooLong {
        node: NodeId,
        origin: NodeId,
        max: usize,
    },

    #[error("node {0} is a clone, its content and progress are read-only")]
    CloneIsReadOnly(NodeId),

    #[error("position {position} is out of bounds for {len} siblings")]
    InvalidPosition { position: usize, len: usize },

    #[error("reorder of the children of {0:?} does not list every sibling exactly once")]
    InvalidReorder(Option<NodeId>),

    #[error("user {user} requires {required} on {node} to perform this action")]
    InsufficientAccess {
        user: UserId,
        node: NodeId,
        required: Rank,
    },
}

/// Referenced entity does not exist.
#[derive(Debug, Error, PartialEq)]
pub enum NotFoundError {
    #[error("node {0} not found")]
    Node(NodeId),

    #[error("share {0} not found")]
    Share(ShareId),

    #[error("graft {0} not found")]
    Graft(GraftId),
}

/// A background task failed.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{task} failed after {attempts} attempt(s): {reason}")]
pub struct PropagationError {
    pub task: String,
    pub attempts: u32,
    pub reason: String,
}

impl PropagationError {
    pub fn new(task: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self {
            task: task.to_string(),
            attempts: 1,
            reason: reason.to_string(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Single broken invariant found by the consistency check.
#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    MissingHierarchyEdge {
        ancestor: NodeId,
        descendant: NodeId,
        expected: u32,
    },
    UnexpectedHierarchyEdge {
        ancestor: NodeId,
        descendant: NodeId,
    },
    TreeCycle(NodeId),
    GraftCycle(GraftId),
    StaleVirtualEdges(GraftId),
    CloneCycle(NodeId),
    DanglingReference(String),
    OrphanedCacheRow {
        node: NodeId,
        principal: Principal,
        source: ShareId,
    },
    StaleCacheRow {
        node: NodeId,
        principal: Principal,
        revision: Revision,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingHierarchyEdge {
                ancestor,
                descendant,
                expected,
            } => write!(
                f,
                "missing hierarchy edge {ancestor} -> {descendant} (distance {expected})"
            ),
            Violation::UnexpectedHierarchyEdge {
                ancestor,
                descendant,
            } => write!(f, "unexpected hierarchy edge {ancestor} -> {descendant}"),
            Violation::TreeCycle(node) => write!(f, "parent links of {node} form a cycle"),
            Violation::GraftCycle(graft) => write!(f, "{graft} closes a cycle"),
            Violation::StaleVirtualEdges(graft) => {
                write!(f, "virtual edges of {graft} do not match the hierarchy")
            }
            Violation::CloneCycle(node) => write!(f, "clone origins of {node} form a cycle"),
            Violation::DanglingReference(what) => write!(f, "dangling reference: {what}"),
            Violation::OrphanedCacheRow {
                node,
                principal,
                source,
            } => write!(
                f,
                "cache row ({node}, {principal}) points at missing or foreign {source}"
            ),
            Violation::StaleCacheRow {
                node,
                principal,
                revision,
            } => write!(
                f,
                "cache row ({node}, {principal}) written at {revision} disagrees with its share"
            ),
        }
    }
}

/// Invariants of the indexes do not hold.
///
/// This always indicates a bug in propagation ordering and is never repaired silently.
#[derive(Debug, Error, PartialEq)]
#[error("{} consistency violation(s), first: {}", .violations.len(), .violations.first().map(ToString::to_string).unwrap_or_default())]
pub struct ConsistencyViolation {
    pub violations: Vec<Violation>,
}

#[derive(Debug, Error, PartialEq)]
pub enum GroveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyViolation),
}

impl From<RankError> for GroveError {
    fn from(value: RankError) -> Self {
        GroveError::Validation(ValidationError::InvalidRank(value))
    }
}
