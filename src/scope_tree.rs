//! Per-thread hierarchy of synchronous scopes.
//!
//! Nodes live in an arena and refer to each other by [`ScopeId`]. A synthetic
//! root covering `[0, u64::MAX]` sits at depth 0, so top-level scopes have
//! depth 1. Children of a node are kept sorted by start, and every depth keeps
//! an ordered index for range and pixel queries.
//!
//! Inserts search upwards from the previously inserted node, which keeps the
//! common case of roughly time-ordered input close to constant time. A new
//! scope that encloses existing siblings adopts them, so inner scopes may be
//! inserted before the scope that contains them.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::error::ScopeTreeError;
use crate::pixel::next_pixel_boundary;
use crate::timer::TimerInfo;

/// Anything with a closed time interval can be organised in a [`ScopeTree`].
pub trait Scope {
    fn start_ns(&self) -> u64;
    fn end_ns(&self) -> u64;
}

impl Scope for TimerInfo {
    fn start_ns(&self) -> u64 {
        self.start_ns
    }

    fn end_ns(&self) -> u64 {
        self.end_ns
    }
}

/// Handle of a node in a [`ScopeTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(usize);

impl ScopeId {
    /// The synthetic root.
    pub const ROOT: ScopeId = ScopeId(0);
}

#[derive(Debug)]
struct Node<T> {
    scope: Option<T>,
    depth: u32,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
}

#[derive(Debug)]
pub struct ScopeTree<T> {
    nodes: Vec<Node<T>>,
    by_depth: Vec<BTreeSet<(u64, ScopeId)>>,
    last_inserted: Option<ScopeId>,
    max_depth: u32,
}

impl<T: Scope> Default for ScopeTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scope> ScopeTree<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                scope: None,
                depth: 0,
                parent: None,
                children: Vec::new(),
            }],
            by_depth: vec![BTreeSet::new()],
            last_inserted: None,
            max_depth: 0,
        }
    }

    /// Number of scopes, not counting the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth of the deepest scope. 0 for an empty tree.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn scope(&self, id: ScopeId) -> Option<&T> {
        self.nodes.get(id.0)?.scope.as_ref()
    }

    pub fn depth(&self, id: ScopeId) -> Option<u32> {
        self.nodes.get(id.0).map(|node| node.depth)
    }

    fn start(&self, id: ScopeId) -> u64 {
        self.nodes[id.0].scope.as_ref().map_or(0, Scope::start_ns)
    }

    fn end(&self, id: ScopeId) -> u64 {
        self.nodes[id.0].scope.as_ref().map_or(u64::MAX, Scope::end_ns)
    }

    fn encloses(&self, id: ScopeId, start_ns: u64, end_ns: u64) -> bool {
        self.start(id) <= start_ns && end_ns <= self.end(id)
    }

    fn overlap(&self, id: ScopeId, start_ns: u64, end_ns: u64) -> ScopeTreeError {
        ScopeTreeError::Overlap {
            start_ns,
            end_ns,
            other_start_ns: self.start(id),
            other_end_ns: self.end(id),
        }
    }

    /// Insert `scope` below the deepest node that encloses it.
    ///
    /// Siblings of the new node that it encloses become its children.
    /// A scope that partially overlaps an existing one is rejected and the
    /// tree is left untouched.
    pub fn insert(&mut self, scope: T) -> Result<ScopeId, ScopeTreeError> {
        let (start_ns, end_ns) = (scope.start_ns(), scope.end_ns());
        if end_ns < start_ns {
            return Err(ScopeTreeError::Inverted { start_ns, end_ns });
        }

        let mut parent = self.last_inserted.unwrap_or(ScopeId::ROOT);
        while !self.encloses(parent, start_ns, end_ns) {
            parent = self.nodes[parent.0].parent.unwrap_or(ScopeId::ROOT);
        }

        // Descend to the deepest enclosing node. Only the last child starting
        // at or before the new scope can enclose it.
        loop {
            let children = &self.nodes[parent.0].children;
            let idx = children.partition_point(|&c| self.start(c) <= start_ns);
            if idx == 0 {
                break;
            }
            let candidate = children[idx - 1];
            if self.encloses(candidate, start_ns, end_ns) {
                parent = candidate;
                continue;
            }
            if self.start(candidate) < start_ns && self.end(candidate) > start_ns {
                return Err(self.overlap(candidate, start_ns, end_ns));
            }
            break;
        }

        // The siblings the new scope encloses form a contiguous run.
        let children = &self.nodes[parent.0].children;
        let lo = children.partition_point(|&c| self.start(c) < start_ns);
        let mut hi = lo;
        while hi < children.len() {
            let child = children[hi];
            if self.start(child) > end_ns {
                break;
            }
            if self.end(child) <= end_ns {
                hi += 1;
                continue;
            }
            if self.start(child) == end_ns {
                break;
            }
            return Err(self.overlap(child, start_ns, end_ns));
        }

        let adopted: Vec<ScopeId> = self.nodes[parent.0].children.drain(lo..hi).collect();
        let depth = self.nodes[parent.0].depth + 1;
        let id = ScopeId(self.nodes.len());
        self.nodes.push(Node {
            scope: Some(scope),
            depth,
            parent: Some(parent),
            children: adopted.clone(),
        });
        self.nodes[parent.0].children.insert(lo, id);
        self.index_at_depth(id, depth, start_ns);
        for child in adopted {
            self.nodes[child.0].parent = Some(id);
            self.push_subtree_down(child);
        }
        self.last_inserted = Some(id);
        Ok(id)
    }

    fn index_at_depth(&mut self, id: ScopeId, depth: u32, start_ns: u64) {
        let depth = depth as usize;
        if self.by_depth.len() <= depth {
            self.by_depth.resize_with(depth + 1, BTreeSet::new);
        }
        self.by_depth[depth].insert((start_ns, id));
        self.max_depth = self.max_depth.max(depth as u32);
    }

    /// Move every node of the subtree rooted at `top` one level deeper.
    fn push_subtree_down(&mut self, top: ScopeId) {
        let mut pending = vec![top];
        while let Some(id) = pending.pop() {
            let start_ns = self.start(id);
            let old_depth = self.nodes[id.0].depth;
            self.by_depth[old_depth as usize].remove(&(start_ns, id));
            self.nodes[id.0].depth = old_depth + 1;
            self.index_at_depth(id, old_depth + 1, start_ns);
            pending.extend_from_slice(&self.nodes[id.0].children);
        }
    }

    /// Enclosing scope, or `None` for top-level scopes.
    pub fn find_parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.nodes
            .get(id.0)?
            .parent
            .filter(|parent| *parent != ScopeId::ROOT)
    }

    pub fn find_first_child(&self, id: ScopeId) -> Option<ScopeId> {
        self.nodes.get(id.0)?.children.first().copied()
    }

    pub fn find_previous_sibling(&self, id: ScopeId) -> Option<ScopeId> {
        let (siblings, pos) = self.sibling_position(id)?;
        pos.checked_sub(1).map(|prev| siblings[prev])
    }

    pub fn find_next_sibling(&self, id: ScopeId) -> Option<ScopeId> {
        let (siblings, pos) = self.sibling_position(id)?;
        siblings.get(pos + 1).copied()
    }

    fn sibling_position(&self, id: ScopeId) -> Option<(&[ScopeId], usize)> {
        let parent = self.nodes.get(id.0)?.parent?;
        let siblings = &self.nodes[parent.0].children;
        let start_ns = self.start(id);
        let first = siblings.partition_point(|&c| self.start(c) < start_ns);
        let offset = siblings[first..].iter().position(|&c| c == id)?;
        Some((siblings, first + offset))
    }

    /// Nodes at `depth` ordered by start.
    pub fn ordered_nodes_at_depth(&self, depth: u32) -> impl Iterator<Item = ScopeId> + '_ {
        self.by_depth
            .get(depth as usize)
            .into_iter()
            .flat_map(|nodes| nodes.iter().map(|&(_, id)| id))
    }

    pub fn find_first_scope_at_or_after(&self, depth: u32, t: u64) -> Option<ScopeId> {
        self.by_depth
            .get(depth as usize)?
            .range((t, ScopeId::ROOT)..)
            .next()
            .map(|&(_, id)| id)
    }

    /// Pixel-bounded query over the nodes at `depth`, see
    /// [`crate::timer_store::TimerStore::get_timers_at_depth_discretised`].
    pub fn get_scopes_at_depth_discretised(
        &self,
        depth: u32,
        pixel_count: u64,
        start_ns: u64,
        end_ns: u64,
    ) -> Vec<ScopeId> {
        let Some(nodes) = self.by_depth.get(depth as usize) else {
            return Vec::new();
        };
        if pixel_count == 0 || end_ns < start_ns {
            return Vec::new();
        }
        if start_ns == end_ns {
            return nodes
                .range(..=(start_ns, ScopeId(usize::MAX)))
                .filter(|&&(_, id)| self.end(id) >= start_ns)
                .map(|&(_, id)| id)
                .collect();
        }

        let mut next = nodes
            .range(..(start_ns, ScopeId::ROOT))
            .next_back()
            .filter(|&&(_, id)| self.end(id) >= start_ns)
            .or_else(|| nodes.range((start_ns, ScopeId::ROOT)..).next())
            .copied();

        let mut result = Vec::new();
        while let Some((node_start, id)) = next {
            if node_start > end_ns {
                break;
            }
            let node_end = self.end(id);
            if node_end < start_ns {
                next = nodes
                    .range((Bound::Excluded((node_start, id)), Bound::Unbounded))
                    .next()
                    .copied();
                continue;
            }
            result.push(id);
            let boundary = next_pixel_boundary(node_end, pixel_count, start_ns, end_ns);
            next = nodes.range((boundary, ScopeId::ROOT)..).next().copied();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Span(u64, u64);

    impl Scope for Span {
        fn start_ns(&self) -> u64 {
            self.0
        }

        fn end_ns(&self) -> u64 {
            self.1
        }
    }

    fn span(tree: &ScopeTree<Span>, id: ScopeId) -> Span {
        *tree.scope(id).unwrap()
    }

    fn spans_at(tree: &ScopeTree<Span>, depth: u32) -> Vec<Span> {
        tree.ordered_nodes_at_depth(depth)
            .map(|id| span(tree, id))
            .collect()
    }

    #[test]
    fn test_nested_in_order() {
        let mut tree = ScopeTree::new();
        let outer = tree.insert(Span(0, 100)).unwrap();
        let inner = tree.insert(Span(10, 20)).unwrap();
        let sibling = tree.insert(Span(30, 40)).unwrap();

        assert_eq!(tree.depth(outer), Some(1));
        assert_eq!(tree.depth(inner), Some(2));
        assert_eq!(tree.find_parent(inner), Some(outer));
        assert_eq!(tree.find_parent(outer), None);
        assert_eq!(tree.find_first_child(outer), Some(inner));
        assert_eq!(tree.find_next_sibling(inner), Some(sibling));
        assert_eq!(tree.find_previous_sibling(sibling), Some(inner));
        assert_eq!(tree.find_previous_sibling(inner), None);
        assert_eq!(tree.max_depth(), 2);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_outer_inserted_after_inner_adopts_children() {
        // Stack-structured scopes are emitted innermost first.
        let mut tree = ScopeTree::new();
        let leaf = tree.insert(Span(1100, 1150)).unwrap();
        let bar = tree.insert(Span(1100, 1200)).unwrap();
        let baz = tree.insert(Span(1210, 1250)).unwrap();
        let foo = tree.insert(Span(1000, 1300)).unwrap();

        assert_eq!(tree.depth(foo), Some(1));
        assert_eq!(tree.depth(bar), Some(2));
        assert_eq!(tree.depth(baz), Some(2));
        assert_eq!(tree.depth(leaf), Some(3));
        assert_eq!(tree.find_parent(bar), Some(foo));
        assert_eq!(tree.find_parent(leaf), Some(bar));
        assert_eq!(spans_at(&tree, 1), vec![Span(1000, 1300)]);
        assert_eq!(spans_at(&tree, 2), vec![Span(1100, 1200), Span(1210, 1250)]);
        assert_eq!(spans_at(&tree, 3), vec![Span(1100, 1150)]);
        assert_eq!(tree.max_depth(), 3);
    }

    #[test]
    fn test_insert_before_last_inserted() {
        let mut tree = ScopeTree::new();
        tree.insert(Span(500, 600)).unwrap();
        let early = tree.insert(Span(100, 200)).unwrap();
        tree.insert(Span(120, 130)).unwrap();

        assert_eq!(spans_at(&tree, 1), vec![Span(100, 200), Span(500, 600)]);
        assert_eq!(tree.find_first_child(early).map(|c| span(&tree, c)), Some(Span(120, 130)));
    }

    #[test]
    fn test_adjacent_scopes_are_siblings() {
        let mut tree = ScopeTree::new();
        let a = tree.insert(Span(0, 10)).unwrap();
        let b = tree.insert(Span(10, 20)).unwrap();
        assert_eq!(tree.depth(a), Some(1));
        assert_eq!(tree.depth(b), Some(1));
        assert_eq!(tree.find_next_sibling(a), Some(b));
    }

    #[test]
    fn test_partial_overlap_rejected() {
        let mut tree = ScopeTree::new();
        tree.insert(Span(0, 100)).unwrap();
        let err = tree.insert(Span(50, 150)).unwrap_err();
        assert_eq!(
            err,
            ScopeTreeError::Overlap {
                start_ns: 50,
                end_ns: 150,
                other_start_ns: 0,
                other_end_ns: 100,
            }
        );
        // Overlapping the start of a later sibling.
        let err = tree.insert(Span(200, 300)).and(tree.insert(Span(150, 250)));
        assert!(err.is_err());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_inverted_scope_rejected() {
        let mut tree = ScopeTree::new();
        assert!(matches!(
            tree.insert(Span(10, 5)),
            Err(ScopeTreeError::Inverted { .. })
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_first_scope_at_or_after() {
        let mut tree = ScopeTree::new();
        for i in 0..10 {
            tree.insert(Span(i * 100, i * 100 + 50)).unwrap();
        }
        let id = tree.find_first_scope_at_or_after(1, 250).unwrap();
        assert_eq!(span(&tree, id), Span(300, 350));
        let id = tree.find_first_scope_at_or_after(1, 300).unwrap();
        assert_eq!(span(&tree, id), Span(300, 350));
        assert!(tree.find_first_scope_at_or_after(1, 901).is_none());
        assert!(tree.find_first_scope_at_or_after(5, 0).is_none());
    }

    #[test]
    fn test_discretised_query() {
        let mut tree = ScopeTree::new();
        for (start, end) in [(0, 10), (11, 20), (21, 30), (31, 40), (41, 50)] {
            tree.insert(Span(start, end)).unwrap();
        }
        let found: Vec<Span> = tree
            .get_scopes_at_depth_discretised(1, 2, 0, 50)
            .into_iter()
            .map(|id| span(&tree, id))
            .collect();
        assert_eq!(found, vec![Span(0, 10), Span(31, 40)]);

        let found: Vec<Span> = tree
            .get_scopes_at_depth_discretised(1, 100, 15, 35)
            .into_iter()
            .map(|id| span(&tree, id))
            .collect();
        assert_eq!(found, vec![Span(11, 20), Span(21, 30), Span(31, 40)]);

        let found = tree.get_scopes_at_depth_discretised(1, 10, 20, 20);
        assert_eq!(found.len(), 1);
        assert!(tree.get_scopes_at_depth_discretised(1, 0, 0, 50).is_empty());
    }

    #[test]
    fn test_parent_child_bounds_hold() {
        let mut tree = ScopeTree::new();
        for (start, end) in [(5, 6), (4, 8), (10, 12), (3, 20), (0, 30), (25, 26)] {
            tree.insert(Span(start, end)).unwrap();
        }
        for depth in 1..=tree.max_depth() {
            for id in tree.ordered_nodes_at_depth(depth) {
                if let Some(parent) = tree.find_parent(id) {
                    let (p, c) = (span(&tree, parent), span(&tree, id));
                    assert!(p.0 <= c.0 && c.1 <= p.1);
                    assert_eq!(tree.depth(id), tree.depth(parent).map(|d| d + 1));
                }
            }
        }
        assert_eq!(tree.max_depth(), 4);
    }
}
