//! Range lookup structures
//!
//! ```text
//!            [10.0.0.0 - 10.255.255.255]  max_end=172.31.255.255
//!             /                        \
//!   [1.0.0.0 - 1.0.0.255]        [172.16.0.0 - 172.31.255.255]
//!   max_end=1.0.0.255            max_end=172.31.255.255
//! ```
//!
//! `RangeTree` is a balanced tree built by sorting on `start` and bisecting;
//! each node carries the largest `end` of its subtree so nested and
//! overlapping ranges are still found. `SortedRanges` merges overlaps into
//! disjoint spans and binary-searches them.

use crate::entry::Span;

#[derive(Debug, Clone)]
struct TreeNode {
    span: Span,
    max_end: u128,
    left: Option<usize>,
    right: Option<usize>,
}

/// Balanced interval tree, stored in an arena
#[derive(Debug, Clone, Default)]
pub struct RangeTree {
    nodes: Vec<TreeNode>,
    root: Option<usize>,
}

impl RangeTree {
    /// Build from spans in any order
    pub fn build(spans: &[Span]) -> Self {
        let mut sorted = spans.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut nodes = Vec::with_capacity(sorted.len());
        let root = bisect(&sorted, &mut nodes);
        Self { nodes, root }
    }

    /// True if any span contains `key`
    #[inline]
    pub fn contains(&self, key: u128) -> bool {
        let mut cursor = self.root;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if node.max_end < key {
                return false;
            }
            if node.span.contains(key) {
                return true;
            }
            match node.left {
                Some(left) if self.nodes[left].max_end >= key => cursor = Some(left),
                _ => {
                    if key < node.span.start {
                        return false;
                    }
                    cursor = node.right;
                }
            }
        }
        false
    }

    /// Number of spans
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the tree holds no spans
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Height of the tree
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: Option<usize>) -> usize {
            match idx {
                None => 0,
                Some(i) => 1 + walk(nodes, nodes[i].left).max(walk(nodes, nodes[i].right)),
            }
        }
        walk(&self.nodes, self.root)
    }
}

fn bisect(sorted: &[Span], nodes: &mut Vec<TreeNode>) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    let left = bisect(&sorted[..mid], nodes);
    let right = bisect(&sorted[mid + 1..], nodes);

    let span = sorted[mid];
    let max_end = [left, right]
        .into_iter()
        .flatten()
        .map(|child| nodes[child].max_end)
        .fold(span.end, u128::max);

    nodes.push(TreeNode {
        span,
        max_end,
        left,
        right,
    });
    Some(nodes.len() - 1)
}

/// Disjoint, sorted spans searched with binary search
#[derive(Debug, Clone, Default)]
pub struct SortedRanges {
    spans: Vec<Span>,
}

impl SortedRanges {
    /// Build from spans in any order, merging overlaps
    pub fn build(spans: &[Span]) -> Self {
        let mut sorted = spans.to_vec();
        sorted.sort_unstable();

        let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
        for span in sorted {
            match merged.last_mut() {
                Some(last) if span.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(span.end);
                }
                _ => merged.push(span),
            }
        }
        Self { spans: merged }
    }

    /// True if any span contains `key`
    #[inline]
    pub fn contains(&self, key: u128) -> bool {
        let idx = self.spans.partition_point(|span| span.start <= key);
        idx > 0 && self.spans[idx - 1].end >= key
    }

    /// Number of disjoint spans after merging
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Check every span in turn
#[inline]
pub fn linear_contains(spans: &[Span], key: u128) -> bool {
    spans.iter().any(|span| span.contains(key))
}
