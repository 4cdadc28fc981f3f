// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission index for trees of nodes which are shared with users or the public.
//!
//! Every node inherits the access of its nearest ancestor carrying a share for the requesting
//! principal. Besides the real parent/child hierarchy nodes can present foreign subtrees through
//! grafts, which act as one extra level of inheritance, and clones read content and permissions
//! through their origin.
//!
//! Access checks never walk the tree. They read a precomputed [`PermissionCache`] which is kept
//! up to date by background [`tasks`] after every structural change. The closure indexes
//! ([`HierarchyIndex`] and [`GraftOverlay`]) are maintained synchronously inside the same write
//! lock as the change itself.
//!
//! ```ignore
//! let grove = Grove::builder().spawn();
//! grove.tree().node_created(root, None, Some(owner))?;
//! grove.shares().create(root, None, Rank::Read, owner)?;
//! grove.wait_idle().await;
//!
//! assert!(grove.resolver().allowed(root, None, Rank::Read));
//! ```
pub mod backoff;
pub mod cache;
pub mod comments;
pub mod config;
mod error;
pub mod graph;
mod grove;
pub mod hierarchy;
pub mod mutator;
pub mod overlay;
pub mod query;
pub mod resolver;
pub mod shares;
pub mod store;
pub mod tasks;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;
pub mod tree;
pub mod worker;

pub use cache::{PermissionCache, RowUpdate};
pub use comments::{CommentIndex, NoComments};
pub use config::Config;
pub use error::{
    ConsistencyViolation, GroveError, NotFoundError, PropagationError, ValidationError, Violation,
};
pub use grove::{Grove, GroveBuilder};
pub use hierarchy::HierarchyIndex;
pub use mutator::HierarchyMutator;
pub use overlay::GraftOverlay;
pub use query::{Filter, QueryResult, Scope, TextFields, TreeQueryEngine};
pub use resolver::PermissionResolver;
pub use shares::ShareStore;
pub use store::{InnerStore, MemoryStore, Sibling};
pub use tasks::{CacheTaskHandler, Task};
pub use tree::{Deleted, Tree};
pub use worker::{FailedTask, InlineQueue, WorkerPool};
