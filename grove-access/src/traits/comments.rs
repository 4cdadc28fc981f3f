// SPDX-License-Identifier: MIT OR Apache-2.0

use grove_core::NodeId;

/// Read access to the comment threads attached to nodes.
///
/// Comments are owned by another system, the query engine only needs their bodies to filter.
pub trait CommentSource: Send + Sync {
    /// Bodies of all comments on `node`, in no particular order.
    fn comment_bodies(&self, node: NodeId) -> Vec<String>;

    fn has_comments(&self, node: NodeId) -> bool {
        !self.comment_bodies(node).is_empty()
    }
}
