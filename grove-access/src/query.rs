// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtered, permission-aware views of the tree.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use grove_core::{NodeId, Rank, UserId};

use crate::error::NotFoundError;
use crate::resolver::cached_rank;
use crate::store::{InnerStore, MemoryStore, Sibling};
use crate::traits::CommentSource;

/// Text fields searched by [`Filter::Text`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextFields {
    #[default]
    Content,
    Comments,
    Both,
}

/// Single predicate over nodes. Active filters are combined with AND.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Node carries the tag, ignoring case.
    Tag(String),

    /// Progress lies within `[min, max]`, both bounds inclusive.
    Progress { min: f64, max: f64 },

    /// Case-insensitive substring search.
    Text { needle: String, fields: TextFields },

    /// Node has at least one comment.
    HasComments,
}

/// Part of the tree a query looks at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    All,

    /// A node with all of its real and virtual descendants.
    Subtree(NodeId),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Visible nodes matching every filter.
    pub matched: BTreeSet<NodeId>,

    /// Matched nodes plus their ancestors, reduced to what the user may read.
    pub visible: BTreeSet<NodeId>,

    /// Aggregated progress of every visible node.
    pub progress_by_id: BTreeMap<NodeId, f64>,

    /// Average progress of the matched nodes, `0.0` if nothing matched.
    pub overall_progress: f64,

    children: BTreeMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Visible children of `parent` in display order, grafts listed by their origin.
    pub fn children(&self, parent: NodeId) -> &[NodeId] {
        self.children
            .get(&parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Visible nodes without a visible parent, in display order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }
}

#[derive(Clone)]
pub struct TreeQueryEngine {
    store: MemoryStore,
    comments: Arc<dyn CommentSource>,
}

impl TreeQueryEngine {
    pub fn new(store: MemoryStore, comments: Arc<dyn CommentSource>) -> Self {
        Self { store, comments }
    }

    /// Evaluate `filters` within `scope` from the perspective of `user` (the public for `None`).
    ///
    /// The matched nodes are expanded by all their real and virtual ancestors inside of the
    /// scope, so the result stays connected, and then reduced to the nodes the user may read.
    pub fn query(
        &self,
        user: Option<UserId>,
        filters: &[Filter],
        scope: Scope,
    ) -> Result<QueryResult, NotFoundError> {
        let store = self.store.read_store();

        let scope: BTreeSet<NodeId> = match scope {
            Scope::All => store.nodes.keys().copied().collect(),
            Scope::Subtree(root) => {
                store.node(root)?;
                store.combined_descendants(root).into_keys().collect()
            }
        };

        let mut matched = scope.clone();
        for filter in filters {
            matched = self.apply(&store, &matched, filter);
            if matched.is_empty() {
                return Ok(QueryResult::default());
            }
        }

        let expanded: BTreeSet<NodeId> = matched
            .iter()
            .flat_map(|node| store.combined_ancestors(*node).into_keys())
            .filter(|node| scope.contains(node))
            .collect();

        let visible: BTreeSet<NodeId> = expanded
            .into_iter()
            .filter(|node| cached_rank(&store, *node, user).satisfies(Rank::Read))
            .collect();
        matched.retain(|node| visible.contains(node));

        let overall_progress = if matched.is_empty() {
            0.0
        } else {
            matched
                .iter()
                .map(|node| own_progress(&store, *node))
                .sum::<f64>()
                / matched.len() as f64
        };

        let children: BTreeMap<NodeId, Vec<NodeId>> = visible
            .iter()
            .map(|node| (*node, displayed_children(&store, *node, &visible)))
            .filter(|(_, children)| !children.is_empty())
            .collect();

        let below: HashSet<NodeId> = children.values().flatten().copied().collect();
        let mut roots: Vec<NodeId> = visible
            .iter()
            .filter(|node| !below.contains(node))
            .copied()
            .collect();
        roots.sort_by_key(|node| {
            let sequence = store.nodes.get(node).map(|node| node.sequence);
            (sequence, *node)
        });

        let mut progress_by_id = BTreeMap::new();
        let mut visiting = HashSet::new();
        for node in &visible {
            aggregate(&store, *node, &children, &mut progress_by_id, &mut visiting);
        }

        Ok(QueryResult {
            matched,
            visible,
            progress_by_id,
            overall_progress,
            children,
            roots,
        })
    }

    fn apply(
        &self,
        store: &InnerStore,
        candidates: &BTreeSet<NodeId>,
        filter: &Filter,
    ) -> BTreeSet<NodeId> {
        let needle = match filter {
            Filter::Text { needle, .. } => needle.to_lowercase(),
            _ => String::new(),
        };

        candidates
            .iter()
            .copied()
            .filter(|node| {
                // Clones are filtered by the content of their origin.
                let Some(record) = store.authoritative(*node) else {
                    return false;
                };

                match filter {
                    Filter::Tag(tag) => record.content.has_tag(tag),
                    Filter::Progress { min, max } => {
                        *min <= record.progress && record.progress <= *max
                    }
                    Filter::Text { fields, .. } => {
                        let in_content = || record.content.text.to_lowercase().contains(&needle);
                        let in_comments = || {
                            self.comments
                                .comment_bodies(record.id)
                                .iter()
                                .any(|body| body.to_lowercase().contains(&needle))
                        };
                        match fields {
                            TextFields::Content => in_content(),
                            TextFields::Comments => in_comments(),
                            TextFields::Both => in_content() || in_comments(),
                        }
                    }
                    Filter::HasComments => self.comments.has_comments(record.id),
                }
            })
            .collect()
    }
}

fn own_progress(store: &InnerStore, node: NodeId) -> f64 {
    store
        .authoritative(node)
        .map(|record| record.progress)
        .unwrap_or_default()
}

/// Real children and graft origins below `node` which are part of `visible`.
fn displayed_children(store: &InnerStore, node: NodeId, visible: &BTreeSet<NodeId>) -> Vec<NodeId> {
    let mut seen = BTreeSet::new();
    store
        .siblings(Some(node))
        .into_iter()
        .filter_map(|sibling| match sibling {
            Sibling::Node(child) => Some(child),
            Sibling::Graft(graft) => store.overlay.get(graft).map(|graft| graft.origin),
        })
        .filter(|child| visible.contains(child) && seen.insert(*child))
        .collect()
}

/// Leaves report their own progress, branches the average of their displayed children.
fn aggregate(
    store: &InnerStore,
    node: NodeId,
    children: &BTreeMap<NodeId, Vec<NodeId>>,
    memo: &mut BTreeMap<NodeId, f64>,
    visiting: &mut HashSet<NodeId>,
) -> f64 {
    if let Some(progress) = memo.get(&node) {
        return *progress;
    }

    let below: Vec<NodeId> = children
        .get(&node)
        .into_iter()
        .flatten()
        .filter(|child| !visiting.contains(*child))
        .copied()
        .collect();

    visiting.insert(node);
    let progress = if below.is_empty() {
        own_progress(store, node)
    } else {
        let sum: f64 = below
            .iter()
            .map(|child| aggregate(store, *child, children, memo, visiting))
            .sum();
        sum / below.len() as f64
    };
    visiting.remove(&node);

    memo.insert(node, progress);
    progress
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use grove_core::{NodeContent, NodeId, Rank, UserId};

    use crate::comments::CommentIndex;
    use crate::error::NotFoundError;
    use crate::test_utils::TreeFixture;

    use super::{Filter, Scope, TextFields};

    const OWNER: UserId = UserId::new(1);
    const ALICE: UserId = UserId::new(2);

    fn id(value: u64) -> NodeId {
        NodeId::new(value)
    }

    fn ids(values: &[u64]) -> BTreeSet<NodeId> {
        values.iter().copied().map(id).collect()
    }

    #[test]
    fn progress_filter_on_public_tree() {
        // R(1) -> C1(2, done), C2(3, open)
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(1))
            .progress(2, 1.0)
            .progress(3, 0.0)
            .share(1, None, Rank::Read);

        let result = fixture
            .grove
            .query()
            .query(None, &[Filter::Progress { min: 1.0, max: 1.0 }], Scope::All)
            .unwrap();

        assert_eq!(result.matched, ids(&[2]));
        assert_eq!(result.visible, ids(&[1, 2]));
        assert_eq!(result.overall_progress, 1.0);
        assert_eq!(
            result.progress_by_id,
            BTreeMap::from([(id(1), 1.0), (id(2), 1.0)])
        );
        assert_eq!(result.children(id(1)), &[id(2)]);
        assert_eq!(result.roots(), &[id(1)]);
    }

    #[test]
    fn filters_combine_with_and() {
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(1))
            .node(4, Some(1))
            .node(5, Some(1))
            .content(2, NodeContent::new("Draft").with_tag("urgent"))
            .content(3, NodeContent::new("Review").with_tag("Urgent"))
            .content(4, NodeContent::new("Ship").with_tag("urgent"))
            .progress(3, 0.5)
            .progress(4, 1.0)
            .share(1, None, Rank::Read);

        let result = fixture
            .grove
            .query()
            .query(
                None,
                &[
                    Filter::Tag("URGENT".into()),
                    Filter::Progress { min: 0.0, max: 0.0 },
                ],
                Scope::All,
            )
            .unwrap();

        assert_eq!(result.matched, ids(&[2]));
        assert_eq!(result.visible, ids(&[1, 2]));
    }

    #[test]
    fn empty_intersection() {
        let fixture = TreeFixture::new()
            .node(1, None)
            .content(1, NodeContent::new("a").with_tag("x"))
            .share(1, None, Rank::Read);

        let result = fixture
            .grove
            .query()
            .query(None, &[Filter::Tag("y".into())], Scope::All)
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.overall_progress, 0.0);
    }

    #[test]
    fn visibility_and_ownership() {
        // 1 -> 2 -> 3, only 2 is shared with Alice, 3 is owned by her.
        let fixture = TreeFixture::new()
            .owned_node(1, None, OWNER)
            .node(2, Some(1))
            .owned_node(3, Some(2), ALICE)
            .node(4, None)
            .share(2, Some(ALICE), Rank::Read)
            .share(3, Some(ALICE), Rank::NoAccess);
        let query = fixture.grove.query();

        let result = query.query(Some(ALICE), &[], Scope::All).unwrap();
        assert_eq!(result.visible, ids(&[2, 3]));
        assert_eq!(result.roots(), &[id(2)]);

        let result = query.query(Some(OWNER), &[], Scope::All).unwrap();
        assert_eq!(result.visible, ids(&[1]));

        let result = query.query(None, &[], Scope::All).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn scope_includes_grafted_subtrees() {
        // 1 -> 2,  10 -> 11 -> 12, 11 grafted below 2
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(10, None)
            .node(11, Some(10))
            .node(12, Some(11))
            .graft(2, 11)
            .progress(12, 0.5)
            .share(1, None, Rank::Read);
        let query = fixture.grove.query();

        let result = query.query(None, &[], Scope::Subtree(id(2))).unwrap();
        assert_eq!(result.visible, ids(&[2, 11, 12]));
        assert_eq!(result.children(id(2)), &[id(11)]);
        assert_eq!(result.progress_by_id[&id(2)], 0.5);

        // Ancestors outside of the scope are not added.
        let result = query
            .query(None, &[Filter::Progress { min: 0.5, max: 0.5 }], Scope::Subtree(id(2)))
            .unwrap();
        assert_eq!(result.visible, ids(&[2, 11, 12]));

        assert_matches!(
            query.query(None, &[], Scope::Subtree(id(99))),
            Err(NotFoundError::Node(_))
        );
    }

    #[test]
    fn branch_progress_averages_children() {
        // 1 -> 2 -> (3: 1.0, 4: 0.0),  1 -> 5: 0.5
        let fixture = TreeFixture::new()
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(2))
            .node(4, Some(2))
            .node(5, Some(1))
            .progress(3, 1.0)
            .progress(5, 0.5)
            .share(1, None, Rank::Read);

        let result = fixture.grove.query().query(None, &[], Scope::All).unwrap();
        assert_eq!(result.progress_by_id[&id(2)], 0.5);
        assert_eq!(result.progress_by_id[&id(1)], 0.5);
        assert_eq!(result.overall_progress, 1.5 / 5.0);
    }

    #[test]
    fn text_search_in_content_and_comments() {
        let comments = Arc::new(CommentIndex::new());
        comments.add(id(3), "Please CHECK the numbers");

        let fixture = TreeFixture::with_comments(comments.clone())
            .node(1, None)
            .node(2, Some(1))
            .node(3, Some(1))
            .node(4, Some(1))
            .content(2, NodeContent::new("Check invoices"))
            .clone_of(4, 2)
            .share(1, None, Rank::Read);
        let query = fixture.grove.query();

        let search = |fields| {
            query
                .query(
                    None,
                    &[Filter::Text {
                        needle: "check".into(),
                        fields,
                    }],
                    Scope::All,
                )
                .unwrap()
                .matched
        };

        // The clone matches through the content of its origin.
        assert_eq!(search(TextFields::Content), ids(&[2, 4]));
        assert_eq!(search(TextFields::Comments), ids(&[3]));
        assert_eq!(search(TextFields::Both), ids(&[2, 3, 4]));

        let result = query.query(None, &[Filter::HasComments], Scope::All).unwrap();
        assert_eq!(result.matched, ids(&[3]));
    }
}
