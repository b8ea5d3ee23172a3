//! Compact node graph of trained trees.
//!
//! A [`TreeGraph`] is an arena of [`GraphNode`]s: parents and children refer
//! to each other by index only. Each node caches, relative to its parent's
//! split column, whether missing values can still reach it
//! (`inclusive_na`) and which categorical levels can (`inclusive_levels`).
//! Both are derived once, when the node is attached to its parent.

use std::collections::VecDeque;

use fixedbitset::FixedBitSet;
use serde_json::{Map, Value, json};

use crate::node::{FeatureIndex, Node, Tree};
use crate::split::{Split, SplitRule, route_right};

/// Side of a child relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// One node of a [`TreeGraph`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphNode {
    node_number: usize,
    parent: Option<usize>,
    depth: usize,
    /// In-bag rows that reached the node while growing; `NaN` if unknown.
    weight: f64,
    col: Option<FeatureIndex>,
    col_name: Option<String>,
    leftward: bool,
    na_vs_rest: bool,
    rule: Option<SplitRule>,
    /// Level names of the split column, for categorical splits.
    domain_values: Option<Vec<String>>,
    pred_value: Option<f64>,
    left: Option<usize>,
    right: Option<usize>,
    inclusive_na: bool,
    /// `None` means every level of the parent's split column can reach the node.
    inclusive_levels: Option<FixedBitSet>,
}

impl GraphNode {
    fn new(node_number: usize, parent: Option<usize>, depth: usize) -> Self {
        Self {
            node_number,
            parent,
            depth,
            weight: f64::NAN,
            col: None,
            col_name: None,
            leftward: false,
            na_vs_rest: false,
            rule: None,
            domain_values: None,
            pred_value: None,
            left: None,
            right: None,
            inclusive_na: false,
            inclusive_levels: None,
        }
    }

    /// Position of the node in its graph.
    #[must_use]
    pub fn node_number(&self) -> usize {
        self.node_number
    }

    /// Parent position, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Edges from the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Split column of an internal node.
    #[must_use]
    pub fn col(&self) -> Option<FeatureIndex> {
        self.col
    }

    /// Split column name of an internal node.
    #[must_use]
    pub fn col_name(&self) -> Option<&str> {
        self.col_name.as_deref()
    }

    /// Whether missing and unseen values go left.
    #[must_use]
    pub fn leftward(&self) -> bool {
        self.leftward
    }

    /// Whether the split separates missing values from everything else.
    #[must_use]
    pub fn na_vs_rest(&self) -> bool {
        self.na_vs_rest
    }

    /// Threshold or inclusion set of an internal node.
    #[must_use]
    pub fn rule(&self) -> Option<&SplitRule> {
        self.rule.as_ref()
    }

    /// Numeric threshold, if this is a regular numeric split.
    #[must_use]
    pub fn split_value(&self) -> Option<f64> {
        match self.rule {
            Some(SplitRule::Numeric { threshold }) if !threshold.is_nan() => Some(threshold),
            _ => None,
        }
    }

    /// Whether the split tests a categorical inclusion set.
    #[must_use]
    pub fn is_categorical(&self) -> bool {
        matches!(self.rule, Some(SplitRule::Categorical { .. }))
    }

    /// Leaf prediction: the path length this tree contributes.
    #[must_use]
    pub fn pred_value(&self) -> Option<f64> {
        self.pred_value
    }

    /// Left child position.
    #[must_use]
    pub fn left(&self) -> Option<usize> {
        self.left
    }

    /// Right child position.
    #[must_use]
    pub fn right(&self) -> Option<usize> {
        self.right
    }

    /// Whether missing values of the parent's split column reach this node.
    #[must_use]
    pub fn inclusive_na(&self) -> bool {
        self.inclusive_na
    }

    /// Levels of the parent's split column that reach this node.
    #[must_use]
    pub fn inclusive_levels(&self) -> Option<&FixedBitSet> {
        self.inclusive_levels.as_ref()
    }

    /// Whether the node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Child a row takes from this node, `None` at a leaf.
    #[must_use]
    pub fn next(&self, row: &[f64]) -> Option<usize> {
        let rule = self.rule.as_ref()?;
        let col = self.col?;
        let value = row.get(col.0).copied().unwrap_or(f64::NAN);
        if route_right(rule, self.leftward, self.na_vs_rest, value) {
            self.right
        } else {
            self.left
        }
    }
}

/// Arena-backed node graph of one tree. Node 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeGraph {
    nodes: Vec<GraphNode>,
}

impl TreeGraph {
    /// All nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Node at `index`.
    #[must_use]
    pub fn node(&self, index: usize) -> &GraphNode {
        &self.nodes[index]
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn add_root(&mut self) -> usize {
        self.nodes.push(GraphNode::new(0, None, 0));
        0
    }

    pub(crate) fn set_split(
        &mut self,
        index: usize,
        split: &Split,
        col_name: String,
        domain_values: Option<Vec<String>>,
    ) {
        let node = &mut self.nodes[index];
        node.col = Some(split.col);
        node.col_name = Some(col_name);
        node.leftward = split.leftward;
        node.na_vs_rest = split.na_vs_rest;
        node.rule = Some(split.rule.clone());
        node.domain_values = domain_values;
    }

    pub(crate) fn set_leaf(&mut self, index: usize, pred_value: f64) {
        self.nodes[index].pred_value = Some(pred_value);
    }

    pub(crate) fn set_weight(&mut self, index: usize, weight: f64) {
        self.nodes[index].weight = weight;
    }

    /// Attach a new child on `side` of `parent`, whose split must already be set.
    pub(crate) fn add_child(&mut self, parent: usize, side: Side) -> usize {
        let index = self.nodes.len();
        let mut child = GraphNode::new(index, Some(parent), self.nodes[parent].depth + 1);

        let p = &self.nodes[parent];
        let edge = match side {
            Side::Left => p.leftward,
            Side::Right => !p.leftward,
        };
        child.inclusive_na = p.col.is_some_and(|col| self.find_inclusive_na(parent, col)) && edge;
        child.inclusive_levels = self.child_inclusive_levels(parent, side);

        self.nodes.push(child);
        match side {
            Side::Left => self.nodes[parent].left = Some(index),
            Side::Right => self.nodes[parent].right = Some(index),
        }
        index
    }

    /// Whether missing values of `col` reach `index`, looking up the nearest
    /// ancestor edge that tested `col`.
    fn find_inclusive_na(&self, index: usize, col: FeatureIndex) -> bool {
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            if self.nodes[parent].col == Some(col) {
                return self.nodes[current].inclusive_na;
            }
            current = parent;
        }
        true
    }

    /// Levels of `col` reaching `index`; `None` if no ancestor tested `col`.
    fn find_inclusive_levels(&self, index: usize, col: FeatureIndex) -> Option<&FixedBitSet> {
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            if self.nodes[parent].col == Some(col) {
                return self.nodes[current].inclusive_levels.as_ref();
            }
            current = parent;
        }
        None
    }

    fn child_inclusive_levels(&self, parent: usize, side: Side) -> Option<FixedBitSet> {
        let p = &self.nodes[parent];
        let rule @ SplitRule::Categorical { .. } = p.rule.as_ref()? else {
            return None;
        };
        let col = p.col?;
        let n_levels = p.domain_values.as_ref().map_or(0, Vec::len);
        let inherited = self.find_inclusive_levels(parent, col);
        let inherited_has = |level: usize| inherited.is_none_or(|bits| bits.contains(level));

        let (include_all, discard_all, want_member) = match side {
            Side::Left => (p.na_vs_rest, false, false),
            Side::Right => (false, p.na_vs_rest, true),
        };
        let mut levels = FixedBitSet::with_capacity(n_levels);
        for level in 0..n_levels {
            let included = if discard_all {
                false
            } else if include_all {
                inherited_has(level)
            } else {
                rule.in_range(level) && rule.contains(level) == want_member && inherited_has(level)
            };
            levels.set(level, included);
        }
        Some(levels)
    }

    /// Leaf reached by `row`, or `None` for a graph without nodes or with a
    /// child index outside it.
    #[must_use]
    pub fn traverse(&self, row: &[f64]) -> Option<&GraphNode> {
        let mut current = self.nodes.first()?;
        while let Some(next) = current.next(row) {
            current = self.nodes.get(next)?;
        }
        Some(current)
    }

    /// Path length this tree assigns to `row`. Zero for an empty graph.
    #[must_use]
    pub fn path_length(&self, row: &[f64]) -> f64 {
        self.traverse(row).and_then(|leaf| leaf.pred_value).unwrap_or(0.0)
    }

    /// Nested JSON description rooted at node 0.
    #[must_use]
    pub fn to_json(&self) -> Value {
        if self.nodes.is_empty() {
            return Value::Null;
        }
        self.node_json(0)
    }

    fn node_json(&self, index: usize) -> Value {
        let node = &self.nodes[index];
        let mut json = Map::new();
        json.insert("nodeNumber".into(), json!(node.node_number));
        if !node.weight.is_nan() {
            json.insert("weight".into(), json!(node.weight));
        }
        json.insert("depth".into(), json!(node.depth));
        json.insert("colId".into(), json!(node.col.map(FeatureIndex::index)));
        json.insert("colName".into(), json!(node.col_name));
        json.insert("leftward".into(), json!(node.leftward));
        json.insert("naVsRest".into(), json!(node.na_vs_rest));
        json.insert("inclusiveNa".into(), json!(node.inclusive_na));
        json.insert("isCategorical".into(), json!(node.is_categorical()));
        if let Some(pred) = node.pred_value {
            json.insert("predValue".into(), json!(pred));
        }
        match (&node.rule, &node.domain_values) {
            (Some(rule @ SplitRule::Categorical { .. }), Some(domain)) => {
                let matched: Vec<&str> = domain
                    .iter()
                    .enumerate()
                    .filter(|&(level, _)| rule.contains(level))
                    .map(|(_, name)| name.as_str())
                    .collect();
                json.insert("matchValues".into(), json!(matched));
            }
            _ => {
                if let Some(value) = node.split_value() {
                    json.insert("splitValue".into(), json!(value));
                }
            }
        }
        if let (Some(levels), Some(parent)) = (&node.inclusive_levels, node.parent)
            && let Some(domain) = &self.nodes[parent].domain_values
        {
            let reaching: Vec<&str> = levels.ones().filter_map(|l| domain.get(l)).map(String::as_str).collect();
            json.insert("inclusiveLevels".into(), json!(reaching));
        }
        if let Some(left) = node.left {
            json.insert("leftChild".into(), self.node_json(left));
        }
        if let Some(right) = node.right {
            json.insert("rightChild".into(), self.node_json(right));
        }
        Value::Object(json)
    }

    /// Convert a grown tree, numbering reachable nodes breadth first.
    pub(crate) fn from_tree(tree: &Tree, names: &[String], domains: &[Option<Vec<String>>]) -> Self {
        let mut graph = TreeGraph::default();
        let root = graph.add_root();
        let mut queue = VecDeque::from([(0usize, root, f64::NAN)]);

        while let Some((arena, index, weight)) = queue.pop_front() {
            graph.set_weight(index, weight);
            let node = tree.node(arena);
            match node {
                Node::Decided {
                    split: Some(split),
                    children: [Some(left), Some(right)],
                    ..
                } => {
                    let col = split.col.0;
                    graph.set_split(index, split, names[col].clone(), domains[col].clone());
                    if weight.is_nan() {
                        graph.set_weight(index, split.n0 + split.n1);
                    }
                    let l = graph.add_child(index, Side::Left);
                    let r = graph.add_child(index, Side::Right);
                    queue.push_back((left.index(), l, split.n0));
                    queue.push_back((right.index(), r, split.n1));
                }
                _ => graph.set_leaf(index, node.depth() as f64),
            }
        }
        graph
    }
}

/// Node graphs of a whole ensemble, in training order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ForestGraph {
    pub(crate) trees: Vec<TreeGraph>,
}

impl ForestGraph {
    /// Graphs of every tree.
    #[must_use]
    pub fn trees(&self) -> &[TreeGraph] {
        &self.trees
    }

    /// JSON of every tree, or of tree `only` when given.
    ///
    /// Shape: `{"trees": [{"index": i, "name": "Tree i", "root": {...}}]}`.
    #[must_use]
    pub fn to_json(&self, only: Option<usize>) -> Value {
        let trees: Vec<Value> = self
            .trees
            .iter()
            .enumerate()
            .filter(|&(i, _)| only.is_none_or(|o| o == i))
            .map(|(i, tree)| {
                json!({
                    "index": i,
                    "name": format!("Tree {i}"),
                    "root": tree.to_json(),
                })
            })
            .collect();
        json!({ "trees": trees })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(col: usize, threshold: f64, leftward: bool) -> Split {
        Split {
            col: FeatureIndex::new(col),
            rule: SplitRule::Numeric { threshold },
            leftward,
            na_vs_rest: false,
            n0: 3.0,
            n1: 1.0,
        }
    }

    fn categorical(col: usize, levels: &[usize], leftward: bool, na_vs_rest: bool) -> Split {
        let mut bits = FixedBitSet::with_capacity(4);
        for &l in levels {
            bits.insert(l);
        }
        Split {
            col: FeatureIndex::new(col),
            rule: SplitRule::Categorical {
                offset: 0,
                bits,
                domain_len: 4,
            },
            leftward,
            na_vs_rest,
            n0: 2.0,
            n1: 2.0,
        }
    }

    fn domain() -> Option<Vec<String>> {
        Some(vec!["a".into(), "b".into(), "c".into(), "d".into()])
    }

    /// Single split with two leaves at depth 1 (left) and 7 (right, distinct marker).
    fn stump(split: &Split, domain_values: Option<Vec<String>>) -> TreeGraph {
        let mut g = TreeGraph::default();
        let root = g.add_root();
        g.set_split(root, split, "x".into(), domain_values);
        let l = g.add_child(root, Side::Left);
        let r = g.add_child(root, Side::Right);
        g.set_leaf(l, 1.0);
        g.set_leaf(r, 7.0);
        g
    }

    #[test]
    fn numeric_traversal_boundaries() {
        let g = stump(&numeric(2, 5.0, false), None);
        let row = |v: f64| vec![0.0, 0.0, v];
        assert_eq!(g.path_length(&row(4.9)), 1.0);
        assert_eq!(g.path_length(&row(5.0)), 7.0);
        assert_eq!(g.path_length(&row(f64::NAN)), 7.0);
    }

    #[test]
    fn categorical_traversal_membership() {
        let g = stump(&categorical(0, &[1, 3], true, false), domain());
        assert_eq!(g.path_length(&[3.0]), 7.0);
        assert_eq!(g.path_length(&[2.0]), 1.0);
        assert_eq!(g.path_length(&[9.0]), 1.0);
        assert_eq!(g.path_length(&[f64::NAN]), 1.0);
    }

    #[test]
    fn empty_graph_has_no_leaf() {
        let g = TreeGraph::default();
        assert!(g.traverse(&[1.0, 2.0]).is_none());
        assert_eq!(g.path_length(&[1.0, 2.0]), 0.0);
    }

    #[test]
    fn traverse_returns_reached_leaf() {
        let g = stump(&numeric(2, 5.0, false), None);
        let leaf = g.traverse(&[0.0, 0.0, 6.0]).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.pred_value, Some(7.0));
    }

    #[test]
    fn short_row_treats_missing_column_as_na() {
        let g = stump(&numeric(2, 5.0, false), None);
        assert_eq!(g.path_length(&[1.0]), 7.0);
    }

    #[test]
    fn inclusive_na_follows_edges() {
        let mut g = TreeGraph::default();
        let root = g.add_root();
        g.set_split(root, &numeric(0, 5.0, true), "x".into(), None);
        let l = g.add_child(root, Side::Left);
        let r = g.add_child(root, Side::Right);
        assert!(g.node(l).inclusive_na());
        assert!(!g.node(r).inclusive_na());

        // A deeper split on the same column inherits the right edge's exclusion.
        g.set_split(r, &numeric(0, 8.0, true), "x".into(), None);
        let rl = g.add_child(r, Side::Left);
        assert!(!g.node(rl).inclusive_na());

        // A split on another column starts from "all missing values reach".
        g.set_split(l, &numeric(1, 0.0, false), "y".into(), None);
        let lr = g.add_child(l, Side::Right);
        assert!(g.node(lr).inclusive_na());
    }

    #[test]
    fn inclusive_levels_narrow_down_the_tree() {
        let mut g = TreeGraph::default();
        let root = g.add_root();
        g.set_split(root, &categorical(0, &[1, 3], false, false), "c".into(), domain());
        let l = g.add_child(root, Side::Left);
        let r = g.add_child(root, Side::Right);
        let ones = |i: usize| g.node(i).inclusive_levels().unwrap().ones().collect::<Vec<_>>();
        assert_eq!(ones(l), vec![0, 2]);
        assert_eq!(ones(r), vec![1, 3]);

        g.set_split(l, &categorical(0, &[2], false, false), "c".into(), domain());
        let ll = g.add_child(l, Side::Left);
        let lr = g.add_child(l, Side::Right);
        let ones = |i: usize| g.node(i).inclusive_levels().unwrap().ones().collect::<Vec<_>>();
        assert_eq!(ones(ll), vec![0]);
        assert_eq!(ones(lr), vec![2]);
    }

    #[test]
    fn na_vs_rest_keeps_levels_on_the_left() {
        let g = stump(&categorical(0, &[], false, true), domain());
        let left = g.node(g.node(0).left().unwrap()).inclusive_levels().unwrap();
        let right = g.node(g.node(0).right().unwrap()).inclusive_levels().unwrap();
        assert_eq!(left.count_ones(..), 4);
        assert_eq!(right.count_ones(..), 0);
    }

    #[test]
    fn numeric_parent_leaves_levels_unset() {
        let g = stump(&numeric(0, 1.0, false), None);
        assert!(g.node(1).inclusive_levels().is_none());
    }

    #[test]
    fn json_shape() {
        let g = stump(&categorical(0, &[1, 3], true, false), domain());
        let json = g.to_json();
        assert_eq!(json["nodeNumber"], 0);
        assert_eq!(json["colName"], "x");
        assert_eq!(json["isCategorical"], true);
        assert_eq!(json["matchValues"], json!(["b", "d"]));
        assert_eq!(json["leftChild"]["predValue"], 1.0);
        assert_eq!(json["rightChild"]["depth"], 1);
        assert_eq!(json["rightChild"]["inclusiveNa"], false);
        assert_eq!(json["leftChild"]["inclusiveLevels"], json!(["a", "c"]));
        assert!(json["leftChild"].get("leftChild").is_none());

        let numeric_json = stump(&numeric(2, 5.0, false), None).to_json();
        assert_eq!(numeric_json["splitValue"], 5.0);
        assert!(numeric_json.get("matchValues").is_none());
    }

    #[test]
    fn forest_json_wraps_trees() {
        let forest = ForestGraph {
            trees: vec![stump(&numeric(0, 1.0, false), None), TreeGraph::default()],
        };
        let all = forest.to_json(None);
        assert_eq!(all["trees"].as_array().unwrap().len(), 2);
        assert_eq!(all["trees"][0]["name"], "Tree 0");
        let one = forest.to_json(Some(1));
        assert_eq!(one["trees"].as_array().unwrap().len(), 1);
        assert_eq!(one["trees"][0]["index"], 1);
    }

    #[test]
    fn from_tree_numbers_breadth_first() {
        use crate::node::NodeIndex;

        let mut tree = Tree::new(vec![FeatureIndex::new(0)]);
        tree.push(Node::Decided {
            parent: None,
            depth: 0,
            split: Some(numeric(0, 5.0, false)),
            children: [Some(NodeIndex::new(2)), Some(NodeIndex::new(1))],
        });
        tree.push(Node::Leaf { depth: 1 });
        tree.push(Node::Leaf { depth: 1 });
        let g = TreeGraph::from_tree(&tree, &["x".to_string()], &[None]);
        assert_eq!(g.len(), 3);
        assert_eq!(g.node(0).left(), Some(1));
        assert_eq!(g.node(0).right(), Some(2));
        assert_eq!(g.node(0).col_name(), Some("x"));
        assert!((g.node(1).weight - 3.0).abs() < f64::EPSILON);
        assert!((g.node(0).weight - 4.0).abs() < f64::EPSILON);
        assert_eq!(g.path_length(&[7.0]), 1.0);
    }
}
