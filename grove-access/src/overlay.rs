// SPDX-License-Identifier: MIT OR Apache-2.0

//! Virtual ancestor/descendant pairs introduced by grafts.
//!
//! A graft `(host, origin)` exposes the subtree of `origin` below `host`. For every real
//! ancestor `A` of the host (host included, distance `dA`) and every real descendant `D` of the
//! origin (origin included, distance `dD`) the overlay keeps a virtual edge `(A, D, dA + 1 + dD)`.
//!
//! Only real edges are combined, a virtual edge never feeds into the derivation of another one.
//! This keeps the overlay at exactly one hop: grafting `B` below `A` exposes the real subtree of
//! `B` but not whatever is grafted somewhere inside of it, no matter in which order the grafts
//! were created.
use std::collections::{BTreeSet, HashMap};

use grove_core::{Graft, GraftId, NodeId, VirtualEdge};

use crate::error::ValidationError;
use crate::hierarchy::HierarchyIndex;

#[derive(Clone, Debug, Default)]
pub struct GraftOverlay {
    grafts: HashMap<GraftId, Graft>,
    edges: HashMap<GraftId, Vec<VirtualEdge>>,
    by_ancestor: HashMap<NodeId, Vec<VirtualEdge>>,
    by_descendant: HashMap<NodeId, Vec<VirtualEdge>>,
}

impl GraftOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, graft: GraftId) -> Option<&Graft> {
        self.grafts.get(&graft)
    }

    pub(crate) fn get_mut(&mut self, graft: GraftId) -> Option<&mut Graft> {
        self.grafts.get_mut(&graft)
    }

    pub fn grafts(&self) -> impl Iterator<Item = &Graft> {
        self.grafts.values()
    }

    /// Grafts presented directly below `host`.
    pub fn hosted_by(&self, host: NodeId) -> impl Iterator<Item = &Graft> {
        self.grafts.values().filter(move |graft| graft.host == host)
    }

    pub fn edges(&self) -> impl Iterator<Item = &VirtualEdge> {
        self.edges.values().flatten()
    }

    pub fn edges_of(&self, graft: GraftId) -> &[VirtualEdge] {
        self.edges.get(&graft).map(Vec::as_slice).unwrap_or_default()
    }

    /// Virtual ancestors of `node` as `(ancestor, distance, graft)`.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u32, GraftId)> + '_ {
        self.by_descendant
            .get(&node)
            .into_iter()
            .flatten()
            .map(|edge| (edge.ancestor, edge.distance, edge.graft))
    }

    /// Virtual descendants of `node` as `(descendant, distance, graft)`.
    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u32, GraftId)> + '_ {
        self.by_ancestor
            .get(&node)
            .into_iter()
            .flatten()
            .map(|edge| (edge.descendant, edge.distance, edge.graft))
    }

    /// Reject grafts which would close a loop or expose a subtree twice below the same host.
    ///
    /// The host must not be reachable from the origin, neither through real parent links nor
    /// through any chain of grafts. The origin must also not already be a virtual descendant of
    /// the host.
    pub fn validate(
        &self,
        host: NodeId,
        origin: NodeId,
        hierarchy: &HierarchyIndex,
    ) -> Result<(), ValidationError> {
        if self.reaches(origin, host, hierarchy) {
            return Err(ValidationError::GraftCycle { host, origin });
        }

        if self
            .descendants(host)
            .any(|(descendant, _, _)| descendant == origin)
        {
            return Err(ValidationError::DuplicateGraft { host, origin });
        }

        Ok(())
    }

    /// Returns `true` if `target` is `from` or is displayed somewhere below it, following real
    /// children and any number of grafts.
    pub fn reaches(&self, from: NodeId, target: NodeId, hierarchy: &HierarchyIndex) -> bool {
        let mut hosted: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for graft in self.grafts.values() {
            hosted.entry(graft.host).or_default().push(graft.origin);
        }

        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(root) = stack.pop() {
            if !visited.insert(root) {
                continue;
            }
            for (node, _) in hierarchy.descendants(root) {
                if node == target {
                    return true;
                }
                if let Some(origins) = hosted.get(&node) {
                    stack.extend(origins);
                }
            }
        }

        false
    }

    /// Register a graft and derive its virtual edges. Returns the number of derived edges.
    pub fn add_graft(
        &mut self,
        graft: Graft,
        hierarchy: &HierarchyIndex,
    ) -> Result<usize, ValidationError> {
        self.validate(graft.host, graft.origin, hierarchy)?;
        let edges = derive_edges(&graft, hierarchy);
        let len = edges.len();
        self.grafts.insert(graft.id, graft);
        self.index(edges);
        Ok(len)
    }

    /// Remove a graft together with every virtual edge tagged with it.
    pub fn remove_graft(&mut self, graft: GraftId) -> Option<Graft> {
        self.unindex(graft);
        self.grafts.remove(&graft)
    }

    /// Connect a newly created node to the hosts of all grafts exposing one of its ancestors.
    pub fn propagate_new_descendant(
        &mut self,
        node: NodeId,
        hierarchy: &HierarchyIndex,
    ) -> Vec<VirtualEdge> {
        let mut edges = Vec::new();

        for graft in self.grafts.values() {
            let Some(depth) = hierarchy.distance(graft.origin, node) else {
                continue;
            };

            edges.extend(hierarchy.ancestors(graft.host).map(|(ancestor, distance)| {
                VirtualEdge {
                    ancestor,
                    descendant: node,
                    distance: distance + 1 + depth,
                    graft: graft.id,
                }
            }));
        }

        self.index(edges.clone());
        edges
    }

    /// Grafts whose derived edges depend on the position of `subtree` (rooted at `root`).
    ///
    /// Must be called after the hierarchy was updated: the previous position of the subtree is
    /// recovered from the edges which are still indexed.
    pub fn affected_by_move(
        &self,
        root: NodeId,
        subtree: &[NodeId],
        hierarchy: &HierarchyIndex,
    ) -> BTreeSet<GraftId> {
        let members: BTreeSet<NodeId> = subtree.iter().copied().collect();

        let mut affected: BTreeSet<GraftId> = self
            .grafts
            .values()
            .filter(|graft| {
                members.contains(&graft.host)
                    || members.contains(&graft.origin)
                    || hierarchy.is_ancestor(graft.origin, root)
            })
            .map(|graft| graft.id)
            .collect();

        affected.extend(self.ancestors(root).map(|(_, _, graft)| graft));
        affected
    }

    /// Re-derive the edges of the given grafts from the current hierarchy.
    pub fn recompute<I>(&mut self, grafts: I, hierarchy: &HierarchyIndex)
    where
        I: IntoIterator<Item = GraftId>,
    {
        for id in grafts {
            self.unindex(id);
            if let Some(graft) = self.grafts.get(&id) {
                let edges = derive_edges(graft, hierarchy);
                self.index(edges);
            }
        }
    }

    /// Forget removed nodes. Grafts hosted by or originating in one of them are dropped and
    /// returned, edges of other grafts pointing at them are pruned.
    pub fn remove_nodes(&mut self, removed: &[NodeId]) -> Vec<Graft> {
        let removed: BTreeSet<NodeId> = removed.iter().copied().collect();

        let dropped: Vec<GraftId> = self
            .grafts
            .values()
            .filter(|graft| removed.contains(&graft.host) || removed.contains(&graft.origin))
            .map(|graft| graft.id)
            .collect();
        let dropped: Vec<Graft> = dropped
            .into_iter()
            .filter_map(|id| self.remove_graft(id))
            .collect();

        for edges in self.edges.values_mut() {
            edges.retain(|edge| {
                !removed.contains(&edge.ancestor) && !removed.contains(&edge.descendant)
            });
        }
        for node in &removed {
            self.by_ancestor.remove(node);
            self.by_descendant.remove(node);
        }
        for edges in self
            .by_ancestor
            .values_mut()
            .chain(self.by_descendant.values_mut())
        {
            edges.retain(|edge| {
                !removed.contains(&edge.ancestor) && !removed.contains(&edge.descendant)
            });
        }

        dropped
    }

    fn index(&mut self, edges: Vec<VirtualEdge>) {
        for edge in edges {
            self.by_ancestor.entry(edge.ancestor).or_default().push(edge);
            self.by_descendant
                .entry(edge.descendant)
                .or_default()
                .push(edge);
            self.edges.entry(edge.graft).or_default().push(edge);
        }
    }

    fn unindex(&mut self, graft: GraftId) {
        let Some(edges) = self.edges.remove(&graft) else {
            return;
        };

        let ancestors: BTreeSet<NodeId> = edges.iter().map(|edge| edge.ancestor).collect();
        let descendants: BTreeSet<NodeId> = edges.iter().map(|edge| edge.descendant).collect();

        for node in ancestors {
            if let Some(list) = self.by_ancestor.get_mut(&node) {
                list.retain(|edge| edge.graft != graft);
                if list.is_empty() {
                    self.by_ancestor.remove(&node);
                }
            }
        }
        for node in descendants {
            if let Some(list) = self.by_descendant.get_mut(&node) {
                list.retain(|edge| edge.graft != graft);
                if list.is_empty() {
                    self.by_descendant.remove(&node);
                }
            }
        }
    }
}

/// Cross product of the real ancestors of the host and the real descendants of the origin.
pub fn derive_edges(graft: &Graft, hierarchy: &HierarchyIndex) -> Vec<VirtualEdge> {
    let below: Vec<(NodeId, u32)> = hierarchy.descendants(graft.origin).collect();

    hierarchy
        .ancestors(graft.host)
        .flat_map(|(ancestor, up)| {
            below.iter().map(move |(descendant, down)| VirtualEdge {
                ancestor,
                descendant: *descendant,
                distance: up + 1 + down,
                graft: graft.id,
            })
        })
        .collect()
}
