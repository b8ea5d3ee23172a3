//! Layer-by-layer growth of a single isolation tree.

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, instrument};

use crate::error::ForestError;
use crate::frame::{Frame, ValueRange};
use crate::histogram::{HistSpec, Histogram, build_layer};
use crate::node::{FeatureIndex, Node, NodeIndex, Tree};
use crate::row_state::RowState;
use crate::split::{SplitCandidate, select_split};

/// Resolved growth parameters shared by every tree of a run.
#[derive(Debug, Clone)]
pub(crate) struct GrowParams {
    pub(crate) max_depth: usize,
    pub(crate) nbins: usize,
    pub(crate) nbins_top_level: usize,
    pub(crate) nbins_cats: usize,
    pub(crate) min_rows: f64,
    pub(crate) mtry: usize,
    pub(crate) chunk_rows: usize,
    /// Level count per column, `None` for numeric columns.
    pub(crate) domains: Vec<Option<usize>>,
}

/// Build a frontier node, drawing its candidate columns.
///
/// Returns `None` when no column of the tree can split within `ranges`.
fn undecided(
    tree: &Tree,
    parent: Option<NodeIndex>,
    depth: usize,
    nbins: usize,
    ranges: Vec<ValueRange>,
    params: &GrowParams,
    rng: &mut impl Rng,
) -> Option<Node> {
    let mut score_cols: Vec<(FeatureIndex, HistSpec)> = tree
        .cols
        .iter()
        .filter_map(|&col| {
            HistSpec::for_range(ranges[col.0], nbins, params.nbins_cats).map(|spec| (col, spec))
        })
        .collect();
    if score_cols.is_empty() {
        return None;
    }
    if score_cols.len() > params.mtry {
        score_cols.shuffle(rng);
        score_cols.truncate(params.mtry);
        score_cols.sort_unstable_by_key(|&(col, _)| col);
    }
    Some(Node::Undecided {
        parent,
        depth,
        nbins,
        ranges,
        score_cols,
    })
}

/// Value ranges seen by each child of a split node.
fn child_ranges(
    ranges: &[ValueRange],
    hists: &[Histogram],
    cand: &SplitCandidate,
) -> [Vec<ValueRange>; 2] {
    let mut inherited = ranges.to_vec();
    for hist in hists {
        inherited[hist.col.0] = hist.observed(0..hist.spec.nbins());
    }
    let mut left = inherited.clone();
    let mut right = inherited;
    left[cand.split.col.0] = cand.left_range;
    right[cand.split.col.0] = cand.right_range;
    [left, right]
}

/// Grow one tree over `frame` using the sampled rows in `state`.
///
/// On return every row's node id points at the deepest node it reached
/// (out-of-bag rows keep their flag), and every dangling child has been
/// replaced by a leaf stamped with its depth.
///
/// # Errors
///
/// Returns [`ForestError::CorruptRowState`] if a layer pass meets a row
/// whose node id is not part of the tree.
#[instrument(skip_all, fields(n_cols = cols.len(), max_depth = params.max_depth))]
pub(crate) fn grow_tree(
    frame: &Frame,
    root_ranges: &[ValueRange],
    cols: Vec<FeatureIndex>,
    params: &GrowParams,
    state: &mut RowState,
    rng: &mut impl Rng,
) -> Result<Tree, ForestError> {
    let mut tree = Tree::new(cols);
    let root_bins = params.nbins_top_level.max(params.nbins);
    let root = undecided(&tree, None, 0, root_bins, root_ranges.to_vec(), params, rng)
        .unwrap_or_else(|| Node::Undecided {
            parent: None,
            depth: 0,
            nbins: root_bins,
            ranges: root_ranges.to_vec(),
            score_cols: Vec::new(),
        });
    tree.push(root);

    let mut layer_start = 0;
    for depth in 0..params.max_depth {
        let hists = build_layer(&tree, layer_start, frame, state, params.chunk_rows)?;
        let layer_end = tree.len();
        let mut splits = 0;

        for (slot, index) in (layer_start..layer_end).enumerate() {
            let Node::Undecided {
                parent,
                depth: node_depth,
                nbins,
                ranges,
                ..
            } = tree.node(index).clone()
            else {
                continue;
            };
            let node_hists = &hists[slot];
            let decided = match select_split(node_hists, &params.domains, params.min_rows, rng) {
                Some(cand) => {
                    let child_bins = (nbins / 2).max(params.nbins);
                    let mut children = [None, None];
                    for (side, ranges) in child_ranges(&ranges, node_hists, &cand).into_iter().enumerate() {
                        children[side] = undecided(
                            &tree,
                            Some(NodeIndex(index)),
                            node_depth + 1,
                            child_bins,
                            ranges,
                            params,
                            rng,
                        )
                        .map(|child| tree.push(child));
                    }
                    splits += 1;
                    Node::Decided {
                        parent,
                        depth: node_depth,
                        split: Some(cand.split),
                        children,
                    }
                }
                None => Node::Decided {
                    parent,
                    depth: node_depth,
                    split: None,
                    children: [None, None],
                },
            };
            tree.replace(NodeIndex(index), decided);
        }

        debug!(depth, frontier = layer_end - layer_start, splits, "layer decided");
        layer_start = layer_end;
        if splits == 0 {
            break;
        }
    }

    finish_leaves(&mut tree);
    Ok(tree)
}

/// Replace every unreachable, depth-chopped or unsplit child by a leaf.
fn finish_leaves(tree: &mut Tree) {
    if matches!(
        tree.root(),
        Node::Undecided { .. } | Node::Decided { split: None, .. }
    ) {
        tree.replace(NodeIndex(0), Node::Leaf { depth: 0 });
        return;
    }

    for index in 0..tree.len() {
        let Node::Decided {
            split: Some(_),
            children,
            depth,
            ..
        } = tree.node(index)
        else {
            continue;
        };
        let (mut children, depth) = (*children, *depth);
        let mut changed = false;
        for child in &mut children {
            let dangling = match child {
                None => true,
                Some(c) => matches!(
                    tree.node(c.0),
                    Node::Undecided { .. } | Node::Decided { split: None, .. }
                ),
            };
            if dangling {
                *child = Some(tree.push(Node::Leaf { depth: depth + 1 }));
                changed = true;
            }
        }
        if changed {
            tree.set_children(NodeIndex(index), children);
        }
    }
}
