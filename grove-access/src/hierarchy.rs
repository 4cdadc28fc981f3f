// SPDX-License-Identifier: MIT OR Apache-2.0

//! Closure index over the real parent/child tree.
//!
//! For every node the index holds all of its ancestors together with their distance, the node
//! itself included at distance `0`. The reverse direction is kept as well so both "who is above
//! me" and "who is below me" are answered without walking parent pointers.
use std::collections::HashMap;

use grove_core::{HierarchyEdge, NodeId};

use crate::error::{NotFoundError, ValidationError};

type DistanceMap = HashMap<NodeId, u32>;

/// Edges which changed during a reparent.
#[derive(Debug, Default, PartialEq)]
pub struct ReparentSummary {
    /// All nodes of the moved subtree, the moved node included.
    pub subtree: Vec<NodeId>,
    pub removed: usize,
    pub added: usize,
}

#[derive(Clone, Debug, Default)]
pub struct HierarchyIndex {
    /// descendant -> ancestor -> distance
    ancestors: HashMap<NodeId, DistanceMap>,

    /// ancestor -> descendant -> distance
    descendants: HashMap<NodeId, DistanceMap>,
}

impl HierarchyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.ancestors.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    /// Index a freshly created node below `parent`.
    pub fn insert(
        &mut self,
        node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<Vec<HierarchyEdge>, NotFoundError> {
        let mut edges = vec![HierarchyEdge {
            ancestor: node,
            descendant: node,
            distance: 0,
        }];

        if let Some(parent) = parent {
            let parent_ancestors = self
                .ancestors
                .get(&parent)
                .ok_or(NotFoundError::Node(parent))?;
            edges.extend(parent_ancestors.iter().map(|(ancestor, distance)| {
                HierarchyEdge {
                    ancestor: *ancestor,
                    descendant: node,
                    distance: distance + 1,
                }
            }));
        }

        for edge in &edges {
            self.link(edge.ancestor, edge.descendant, edge.distance);
        }

        Ok(edges)
    }

    /// Move `node` and its whole subtree below `new_parent`.
    ///
    /// All edges between the subtree and its previous ancestors are dropped and the edges to the
    /// new ancestors are derived in one pass over the subtree. Edges inside the subtree keep their
    /// distance.
    pub fn reparent(
        &mut self,
        node: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<ReparentSummary, ValidationError> {
        let subtree = self
            .descendants
            .get(&node)
            .cloned()
            .unwrap_or_else(|| HashMap::from([(node, 0)]));

        let new_ancestors = match new_parent {
            Some(parent) => {
                if subtree.contains_key(&parent) {
                    return Err(ValidationError::MoveCycle { node, parent });
                }
                self.ancestors.get(&parent).cloned().unwrap_or_default()
            }
            None => DistanceMap::new(),
        };

        let old_ancestors: Vec<NodeId> = self
            .ancestors
            .get(&node)
            .map(|ancestors| {
                ancestors
                    .keys()
                    .filter(|ancestor| **ancestor != node)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        let mut summary = ReparentSummary {
            subtree: subtree.keys().copied().collect(),
            ..Default::default()
        };

        for member in subtree.keys() {
            for ancestor in &old_ancestors {
                if self.unlink(*ancestor, *member) {
                    summary.removed += 1;
                }
            }
        }

        for (member, depth) in &subtree {
            for (ancestor, distance) in &new_ancestors {
                self.link(*ancestor, *member, distance + 1 + depth);
                summary.added += 1;
            }
        }

        summary.subtree.sort();
        Ok(summary)
    }

    /// Remove `node` and everything below it. Returns the removed nodes.
    pub fn remove_subtree(&mut self, node: NodeId) -> Vec<NodeId> {
        let Some(subtree) = self.descendants.get(&node).cloned() else {
            return Vec::new();
        };

        for member in subtree.keys() {
            if let Some(ancestors) = self.ancestors.remove(member) {
                for ancestor in ancestors.keys() {
                    if let Some(below) = self.descendants.get_mut(ancestor) {
                        below.remove(member);
                    }
                }
            }
            self.descendants.remove(member);
        }

        let mut removed: Vec<NodeId> = subtree.into_keys().collect();
        removed.sort();
        removed
    }

    /// All ancestors of `node` with their distance, `node` itself included.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.ancestors
            .get(&node)
            .into_iter()
            .flat_map(|ancestors| ancestors.iter().map(|(id, distance)| (*id, *distance)))
    }

    /// All descendants of `node` with their distance, `node` itself included.
    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.descendants
            .get(&node)
            .into_iter()
            .flat_map(|descendants| descendants.iter().map(|(id, distance)| (*id, *distance)))
    }

    pub fn distance(&self, ancestor: NodeId, descendant: NodeId) -> Option<u32> {
        self.ancestors
            .get(&descendant)
            .and_then(|ancestors| ancestors.get(&ancestor))
            .copied()
    }

    /// Returns `true` if `ancestor` is `descendant` or lies above it.
    pub fn is_ancestor(&self, ancestor: NodeId, descendant: NodeId) -> bool {
        self.distance(ancestor, descendant).is_some()
    }

    /// Every edge of the closure, self-edges included.
    pub fn edges(&self) -> impl Iterator<Item = HierarchyEdge> + '_ {
        self.ancestors.iter().flat_map(|(descendant, ancestors)| {
            ancestors.iter().map(|(ancestor, distance)| HierarchyEdge {
                ancestor: *ancestor,
                descendant: *descendant,
                distance: *distance,
            })
        })
    }

    fn link(&mut self, ancestor: NodeId, descendant: NodeId, distance: u32) {
        self.ancestors
            .entry(descendant)
            .or_default()
            .insert(ancestor, distance);
        self.descendants
            .entry(ancestor)
            .or_default()
            .insert(descendant, distance);
    }

    fn unlink(&mut self, ancestor: NodeId, descendant: NodeId) -> bool {
        let removed = self
            .ancestors
            .get_mut(&descendant)
            .and_then(|ancestors| ancestors.remove(&ancestor))
            .is_some();
        if let Some(descendants) = self.descendants.get_mut(&ancestor) {
            descendants.remove(&descendant);
        }
        removed
    }
}
