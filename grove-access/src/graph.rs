// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consistency checks over the tree, the graft overlay and the permission cache.
//!
//! None of these are run on the request path. They exist to detect propagation bugs loudly, any
//! violation is reported and never repaired.
use std::collections::{BTreeSet, HashMap, HashSet};

use grove_core::{CachedRank, NodeId, VirtualEdge};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::error;

use crate::error::{ConsistencyViolation, Violation};
use crate::overlay::derive_edges;
use crate::store::InnerStore;

/// Nodes taking part in a cycle of `graph`, grouped per strongly connected component.
fn cycles(graph: &DiGraphMap<NodeId, ()>) -> Vec<Vec<NodeId>> {
    tarjan_scc(graph)
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || component
                    .first()
                    .is_some_and(|node| graph.contains_edge(*node, *node))
        })
        .collect()
}

fn check_references(store: &InnerStore, violations: &mut Vec<Violation>) {
    for node in store.nodes.values() {
        if let Some(parent) = node.parent {
            if !store.contains(parent) {
                violations.push(Violation::DanglingReference(format!(
                    "parent {parent} of {}",
                    node.id
                )));
            }
        }
        if let Some(origin) = node.origin {
            if !store.contains(origin) {
                violations.push(Violation::DanglingReference(format!(
                    "origin {origin} of {}",
                    node.id
                )));
            }
        }
        if !store.children_of(node.parent).any(|child| child == node.id) {
            violations.push(Violation::DanglingReference(format!(
                "{} is missing from the child list of its parent",
                node.id
            )));
        }
    }

    for graft in store.overlay.grafts() {
        for node in [graft.host, graft.origin] {
            if !store.contains(node) {
                violations.push(Violation::DanglingReference(format!("{node} of {}", graft.id)));
            }
        }
    }

    for share in store.shares.iter() {
        if !store.contains(share.node) {
            violations.push(Violation::DanglingReference(format!(
                "{} of {}",
                share.node, share.id
            )));
        }
    }
}

/// Returns the nodes which are part of a cycle of parent links.
fn check_tree(store: &InnerStore, violations: &mut Vec<Violation>) -> HashSet<NodeId> {
    let mut graph = DiGraphMap::new();
    for node in store.nodes.values() {
        graph.add_node(node.id);
        if let Some(parent) = node.parent {
            graph.add_edge(parent, node.id, ());
        }
    }

    let mut cyclic = HashSet::new();
    for component in cycles(&graph) {
        if let Some(first) = component.iter().min() {
            violations.push(Violation::TreeCycle(*first));
        }
        cyclic.extend(component);
    }
    cyclic
}

/// Compare the closure index against the ancestors found by walking parent links.
fn check_closure(store: &InnerStore, cyclic: &HashSet<NodeId>, violations: &mut Vec<Violation>) {
    'nodes: for node in store.nodes.keys().filter(|node| !cyclic.contains(node)) {
        let mut expected: HashMap<NodeId, u32> = HashMap::from([(*node, 0)]);
        let mut current = *node;
        let mut distance = 0;
        while let Some(parent) = store.nodes.get(&current).and_then(|record| record.parent) {
            // Already reported as a tree cycle.
            if cyclic.contains(&parent) {
                continue 'nodes;
            }
            distance += 1;
            expected.insert(parent, distance);
            current = parent;
        }

        let indexed: HashMap<NodeId, u32> = store.hierarchy.ancestors(*node).collect();
        for (ancestor, distance) in &expected {
            if indexed.get(ancestor) != Some(distance) {
                violations.push(Violation::MissingHierarchyEdge {
                    ancestor: *ancestor,
                    descendant: *node,
                    expected: *distance,
                });
            }
        }
        for ancestor in indexed.keys() {
            if !expected.contains_key(ancestor) {
                violations.push(Violation::UnexpectedHierarchyEdge {
                    ancestor: *ancestor,
                    descendant: *node,
                });
            }
        }
    }
}

fn check_grafts(store: &InnerStore, violations: &mut Vec<Violation>) {
    let mut graph = DiGraphMap::new();
    for node in store.nodes.values() {
        graph.add_node(node.id);
        if let Some(parent) = node.parent {
            graph.add_edge(parent, node.id, ());
        }
    }
    for graft in store.overlay.grafts() {
        graph.add_edge(graft.host, graft.origin, ());
    }

    let components: Vec<BTreeSet<NodeId>> = cycles(&graph)
        .into_iter()
        .map(|component| component.into_iter().collect())
        .collect();

    for graft in store.overlay.grafts() {
        if components
            .iter()
            .any(|component| component.contains(&graft.host) && component.contains(&graft.origin))
        {
            violations.push(Violation::GraftCycle(graft.id));
        }

        let key = |edge: &VirtualEdge| (edge.ancestor, edge.descendant, edge.distance);
        let expected: BTreeSet<_> = derive_edges(graft, &store.hierarchy).iter().map(key).collect();
        let indexed: BTreeSet<_> = store.overlay.edges_of(graft.id).iter().map(key).collect();
        if expected != indexed {
            violations.push(Violation::StaleVirtualEdges(graft.id));
        }
    }
}

fn check_clones(store: &InnerStore, violations: &mut Vec<Violation>) {
    let mut graph = DiGraphMap::new();
    for node in store.nodes.values() {
        if let Some(origin) = node.origin {
            graph.add_edge(node.id, origin, ());
        }
    }

    for component in cycles(&graph) {
        if let Some(first) = component.iter().min() {
            violations.push(Violation::CloneCycle(*first));
        }
    }
}

fn check_cache(store: &InnerStore, violations: &mut Vec<Violation>) {
    for entry in store.cache.iter() {
        let share = store.shares.get(entry.source).filter(|share| {
            share.principal == entry.principal
                && store.contains(entry.node)
                && store.combined_ancestors(entry.node).contains_key(&share.node)
        });

        match share {
            None => violations.push(Violation::OrphanedCacheRow {
                node: entry.node,
                principal: entry.principal,
                source: entry.source,
            }),
            Some(share) if CachedRank::from(share.rank) != entry.rank => {
                violations.push(Violation::StaleCacheRow {
                    node: entry.node,
                    principal: entry.principal,
                    revision: entry.revision,
                })
            }
            Some(_) => (),
        }
    }
}

/// Validate every structural invariant of the store.
///
/// Cache rows are only checked against their source shares. Rows which are still waiting for
/// background propagation might be reported, run this when the task queue is idle.
pub fn check_consistency(store: &InnerStore) -> Result<(), ConsistencyViolation> {
    let mut violations = Vec::new();

    check_references(store, &mut violations);
    let cyclic = check_tree(store, &mut violations);
    check_closure(store, &cyclic, &mut violations);
    check_grafts(store, &mut violations);
    check_clones(store, &mut violations);
    check_cache(store, &mut violations);

    if violations.is_empty() {
        return Ok(());
    }

    for violation in &violations {
        error!(%violation, "consistency violation");
    }
    Err(ConsistencyViolation { violations })
}
