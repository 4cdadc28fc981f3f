// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background units of work bringing the permission cache up to date.
use std::fmt;

use grove_core::{NodeId, Principal, Revision};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cache::PermissionCache;
use crate::error::PropagationError;
use crate::store::MemoryStore;
use crate::traits::TaskHandler;

/// Payload of a background task.
///
/// Every task carries the revision of the mutation which caused it. Rows written by a newer
/// revision are never overwritten by an older task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    /// Recompute the rows of every relevant principal on the given nodes.
    RebuildNodes {
        nodes: Vec<NodeId>,
        revision: Revision,
    },

    /// Recompute the rows of one principal on `root` and all its real and virtual descendants.
    RebuildSubtree {
        root: NodeId,
        principal: Principal,
        revision: Revision,
    },

    /// Recompute the whole table.
    Backfill { revision: Revision },
}

impl Task {
    pub fn revision(&self) -> Revision {
        match self {
            Task::RebuildNodes { revision, .. }
            | Task::RebuildSubtree { revision, .. }
            | Task::Backfill { revision } => *revision,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::RebuildNodes { nodes, revision } => {
                write!(f, "rebuild {} node(s) at {revision}", nodes.len())
            }
            Task::RebuildSubtree {
                root,
                principal,
                revision,
            } => write!(f, "rebuild subtree {root} for {principal} at {revision}"),
            Task::Backfill { revision } => write!(f, "backfill at {revision}"),
        }
    }
}

/// Executes tasks against the permission cache of a store.
#[derive(Clone, Debug)]
pub struct CacheTaskHandler {
    store: MemoryStore,
    cache: PermissionCache,
}

impl CacheTaskHandler {
    pub fn new(store: MemoryStore, chunk_size: usize) -> Self {
        let cache = PermissionCache::new(store.clone(), chunk_size);
        Self { store, cache }
    }
}

impl TaskHandler for CacheTaskHandler {
    fn handle(&self, task: &Task) -> Result<(), PropagationError> {
        // Revisions are only handed out by the store, a task from the future was not produced
        // by it.
        let committed = self.store.read_store().revision();
        if task.revision() > committed {
            return Err(PropagationError::new(
                task,
                format!("revision is ahead of the store at {committed}"),
            ));
        }

        let changed = match task {
            Task::RebuildNodes { nodes, revision } => self.cache.rebuild_nodes_at(nodes, *revision),
            Task::RebuildSubtree {
                root,
                principal,
                revision,
            } => self.cache.rebuild_subtree_at(*root, *principal, *revision),
            Task::Backfill { revision } => self.cache.backfill_at(*revision),
        };

        trace!(%task, changed, "handled task");
        Ok(())
    }
}
