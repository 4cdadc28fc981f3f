// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory comment bodies for filtering.
use std::collections::HashMap;
use std::sync::RwLock;

use grove_core::NodeId;

use crate::traits::CommentSource;

/// Source without any comments.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComments;

impl CommentSource for NoComments {
    fn comment_bodies(&self, _node: NodeId) -> Vec<String> {
        Vec::new()
    }

    fn has_comments(&self, _node: NodeId) -> bool {
        false
    }
}

/// Comment bodies kept in memory, fed by whoever owns the comment threads.
#[derive(Debug, Default)]
pub struct CommentIndex {
    bodies: RwLock<HashMap<NodeId, Vec<String>>>,
}

impl CommentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, node: NodeId, body: impl Into<String>) {
        self.bodies
            .write()
            .expect("acquire exclusive write access on comments")
            .entry(node)
            .or_default()
            .push(body.into());
    }

    /// Forget all comments of a node, for example after it was deleted.
    pub fn clear(&self, node: NodeId) {
        self.bodies
            .write()
            .expect("acquire exclusive write access on comments")
            .remove(&node);
    }
}

impl CommentSource for CommentIndex {
    fn comment_bodies(&self, node: NodeId) -> Vec<String> {
        self.bodies
            .read()
            .expect("acquire shared read access on comments")
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    fn has_comments(&self, node: NodeId) -> bool {
        self.bodies
            .read()
            .expect("acquire shared read access on comments")
            .get(&node)
            .is_some_and(|bodies| !bodies.is_empty())
    }
}
