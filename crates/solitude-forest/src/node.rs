use std::fmt;

use crate::frame::ValueRange;
use crate::histogram::HistSpec;
use crate::split::Split;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(pub(crate) usize);

impl FeatureIndex {
    /// Create a new feature index from a zero-based column position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a node arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    /// Create a new node index from a zero-based arena position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node of a tree under construction.
///
/// Nodes move `Undecided -> Decided`, and the final pass of the grower turns
/// dangling children into `Leaf` nodes.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    /// Frontier node waiting for its histograms.
    Undecided {
        parent: Option<NodeIndex>,
        depth: usize,
        /// Numeric bin count for this node's histograms.
        nbins: usize,
        /// Values that can reach this node, per frame column.
        ranges: Vec<ValueRange>,
        /// Candidate columns drawn when the node was created.
        score_cols: Vec<(FeatureIndex, HistSpec)>,
    },
    /// Node whose split search has run. `split == None` means no column
    /// could split it; such a node acts as a leaf for rows reaching it.
    Decided {
        parent: Option<NodeIndex>,
        depth: usize,
        split: Option<Split>,
        /// Left and right children; `None` marks an unreachable child.
        children: [Option<NodeIndex>; 2],
    },
    /// Terminal node. Its depth is the path length it contributes.
    Leaf { depth: usize },
}

impl Node {
    pub(crate) fn depth(&self) -> usize {
        match self {
            Node::Undecided { depth, .. } | Node::Decided { depth, .. } | Node::Leaf { depth, .. } => {
                *depth
            }
        }
    }

    /// A decided node with a split.
    pub(crate) fn split(&self) -> Option<&Split> {
        match self {
            Node::Decided { split, .. } => split.as_ref(),
            _ => None,
        }
    }
}

/// Append-only node arena of one tree. Node 0 is the root.
#[derive(Debug, Clone)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    /// Columns this tree may split on.
    pub(crate) cols: Vec<FeatureIndex>,
}

impl Tree {
    pub(crate) fn new(cols: Vec<FeatureIndex>) -> Self {
        Self {
            nodes: Vec::new(),
            cols,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeIndex {
        self.nodes.push(node);
        NodeIndex(self.nodes.len() - 1)
    }

    pub(crate) fn replace(&mut self, index: NodeIndex, node: Node) {
        self.nodes[index.0] = node;
    }

    /// Point a decided node at new children.
    pub(crate) fn set_children(&mut self, index: NodeIndex, new_children: [Option<NodeIndex>; 2]) {
        if let Node::Decided { children, .. } = &mut self.nodes[index.0] {
            *children = new_children;
        }
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn root(&self) -> &Node {
        &self.nodes[0]
    }
}
