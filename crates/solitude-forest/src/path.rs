//! Path-length bookkeeping after each tree is grown.

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::error::ForestError;
use crate::frame::Frame;
use crate::node::{Node, Tree};
use crate::row_state::{RowState, unwrap_nid};

/// Accumulated path lengths of one row, packed into a single `u64` slot.
///
/// The high half holds the path length summed over every tree grown so far,
/// the low half the part of that sum contributed by trees for which the row
/// was out of bag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackedPath {
    /// Sum of leaf depths over all trees.
    pub total: u32,
    /// Sum of leaf depths over the trees for which the row was out of bag.
    pub oob: u32,
}

impl PackedPath {
    /// Pack into one slot.
    #[must_use]
    pub fn encode(self) -> u64 {
        (u64::from(self.total) << 32) | u64::from(self.oob)
    }

    /// Unpack a slot written by [`PackedPath::encode`].
    #[must_use]
    pub fn decode(raw: u64) -> Self {
        Self {
            total: (raw >> 32) as u32,
            oob: raw as u32,
        }
    }

    /// Add one tree's path length and return the new total.
    pub fn add(&mut self, depth: u32, was_oob: bool) -> u32 {
        self.total = self.total.saturating_add(depth);
        if was_oob {
            self.oob = self.oob.saturating_add(depth);
        }
        self.total
    }
}

/// Fold one tree's depth into a packed slot and return the new total.
pub(crate) fn encode_new_path_length(slot: &mut u64, depth: u32, was_oob: bool) -> u32 {
    let mut packed = PackedPath::decode(*slot);
    let total = packed.add(depth, was_oob);
    *slot = packed.encode();
    total
}

/// Smallest and largest accumulated total path length over all rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PathExtremes {
    pub(crate) min: u32,
    pub(crate) max: u32,
}

impl PathExtremes {
    pub(crate) const EMPTY: PathExtremes = PathExtremes { min: u32::MAX, max: 0 };

    fn include(self, total: u32) -> Self {
        Self {
            min: self.min.min(total),
            max: self.max.max(total),
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Depth of the leaf a row ends in, starting from the node it was left on.
///
/// A row left on a frontier node, or on a node that found no split, takes
/// its parent's decision instead.
pub(crate) fn leaf_depth(tree: &Tree, nid: i32, row: usize, frame: &Frame) -> Result<usize, ForestError> {
    if let Node::Leaf { depth, .. } = tree.root() {
        return Ok(*depth);
    }
    let corrupt = || ForestError::CorruptRowState {
        row,
        nid,
        n_nodes: tree.len(),
    };
    if nid < 0 || nid as usize >= tree.len() {
        return Err(corrupt());
    }
    let mut index = nid as usize;
    if let Node::Undecided { parent, .. } = tree.node(index) {
        index = parent.ok_or_else(corrupt)?.index();
    }
    if let Node::Decided { split: None, parent, .. } = tree.node(index) {
        index = parent.ok_or_else(corrupt)?.index();
    }
    loop {
        match tree.node(index) {
            Node::Leaf { depth, .. } => return Ok(*depth),
            Node::Decided {
                split: Some(split),
                children,
                ..
            } => {
                let side = usize::from(split.goes_right(frame.value(row, split.col.0)));
                index = children[side].ok_or_else(corrupt)?.index();
            }
            _ => return Err(corrupt()),
        }
    }
}

/// Record every row's path length through a freshly grown tree.
///
/// Out-of-bag rows bump their out-of-bag counter. Every row's node id is
/// reset to the root for the next tree. Returns the extremes of the
/// accumulated total path length.
///
/// # Errors
///
/// Returns [`ForestError::CorruptRowState`] if a row's node id cannot be
/// resolved to a leaf of `tree`.
#[instrument(skip_all, fields(n_nodes = tree.len()))]
pub(crate) fn track_paths(
    tree: &Tree,
    frame: &Frame,
    state: &mut RowState,
    chunk_rows: usize,
) -> Result<PathExtremes, ForestError> {
    let extremes = state
        .nids
        .par_chunks_mut(chunk_rows)
        .zip(state.path.par_chunks_mut(chunk_rows))
        .zip(state.oob_count.par_chunks_mut(chunk_rows))
        .enumerate()
        .map(|(chunk, ((nids, paths), oob_counts))| {
            let offset = chunk * chunk_rows;
            let mut acc = PathExtremes::EMPTY;
            for (i, ((nid, path), oob_count)) in nids
                .iter_mut()
                .zip(paths.iter_mut())
                .zip(oob_counts.iter_mut())
                .enumerate()
            {
                let row = offset + i;
                let (logical, was_oob) = unwrap_nid(*nid);
                if was_oob {
                    *oob_count += 1;
                }
                let depth = leaf_depth(tree, logical, row, frame)?;
                let total = encode_new_path_length(path, depth as u32, was_oob);
                acc = acc.include(total);
                *nid = 0;
            }
            Ok::<_, ForestError>(acc)
        })
        .collect::<Result<Vec<_>, ForestError>>()?
        .into_iter()
        .fold(PathExtremes::EMPTY, PathExtremes::merge);

    debug!(min = extremes.min, max = extremes.max, "path lengths tracked");
    Ok(extremes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;
    use crate::node::{FeatureIndex, NodeIndex};
    use crate::row_state::nid_to_oob;
    use crate::split::{Split, SplitRule};

    #[test]
    fn packed_path_round_trips() {
        for (total, oob) in [(0, 0), (1, 0), (0, 1), (17, 5), (u32::MAX, u32::MAX), (u32::MAX, 0)] {
            let packed = PackedPath { total, oob };
            assert_eq!(PackedPath::decode(packed.encode()), packed);
        }
    }

    #[test]
    fn oob_flag_round_trips_through_slot() {
        for (depth, was_oob) in [(0, false), (0, true), (3, false), (3, true), (255, true)] {
            let mut slot = 0;
            encode_new_path_length(&mut slot, depth, was_oob);
            let packed = PackedPath::decode(slot);
            assert_eq!(packed.total, depth);
            assert_eq!(packed.oob, if was_oob { depth } else { 0 });
        }
    }

    #[test]
    fn lengths_accumulate_across_trees() {
        let mut slot = 0;
        assert_eq!(encode_new_path_length(&mut slot, 3, true), 3);
        assert_eq!(encode_new_path_length(&mut slot, 4, false), 7);
        assert_eq!(encode_new_path_length(&mut slot, 2, true), 9);
        assert_eq!(PackedPath::decode(slot), PackedPath { total: 9, oob: 5 });
    }

    /// Root split on `x >= 5`; left child is a leaf, right child split on
    /// `x >= 8` into two leaves.
    fn two_level_tree() -> Tree {
        let split = |threshold| Split {
            col: FeatureIndex::new(0),
            rule: SplitRule::Numeric { threshold },
            leftward: false,
            na_vs_rest: false,
            n0: 1.0,
            n1: 1.0,
        };
        let mut tree = Tree::new(vec![FeatureIndex::new(0)]);
        tree.push(Node::Decided {
            parent: None,
            depth: 0,
            split: Some(split(5.0)),
            children: [Some(NodeIndex::new(1)), Some(NodeIndex::new(2))],
        });
        tree.push(Node::Leaf { depth: 1 });
        tree.push(Node::Decided {
            parent: Some(NodeIndex::new(0)),
            depth: 1,
            split: Some(split(8.0)),
            children: [Some(NodeIndex::new(3)), Some(NodeIndex::new(4))],
        });
        tree.push(Node::Leaf { depth: 2 });
        tree.push(Node::Leaf { depth: 2 });
        tree
    }

    #[test]
    fn tracker_resolves_leaves_and_resets_rows() {
        let frame = Frame::new(vec![Column::numeric("x", vec![1.0, 6.0, 9.0, f64::NAN])]).unwrap();
        let tree = two_level_tree();
        let mut state = RowState::new(4);
        // Rows left where the last layer pass put them.
        state.nids = vec![0, 2, nid_to_oob(2), nid_to_oob(2)];

        let extremes = track_paths(&tree, &frame, &mut state, 3).unwrap();

        let packed: Vec<PackedPath> = state.path.iter().map(|&p| PackedPath::decode(p)).collect();
        assert_eq!(packed[0], PackedPath { total: 1, oob: 0 });
        assert_eq!(packed[1], PackedPath { total: 2, oob: 0 });
        assert_eq!(packed[2], PackedPath { total: 2, oob: 2 });
        assert_eq!(packed[3], PackedPath { total: 2, oob: 2 });
        assert_eq!(state.oob_count, vec![0, 0, 1, 1]);
        assert!(state.nids.iter().all(|&n| n == 0));
        assert_eq!(extremes, PathExtremes { min: 1, max: 2 });
    }

    #[test]
    fn trivial_tree_has_zero_depth() {
        let frame = Frame::new(vec![Column::numeric("x", vec![1.0, 2.0])]).unwrap();
        let mut tree = Tree::new(vec![FeatureIndex::new(0)]);
        tree.push(Node::Leaf { depth: 0 });
        let mut state = RowState::new(2);
        state.nids = vec![0, nid_to_oob(0)];
        let extremes = track_paths(&tree, &frame, &mut state, 8).unwrap();
        assert_eq!(extremes, PathExtremes { min: 0, max: 0 });
        assert_eq!(state.oob_count, vec![0, 1]);
    }

    #[test]
    fn unsplit_node_defers_to_parent() {
        let frame = Frame::new(vec![Column::numeric("x", vec![9.5])]).unwrap();
        let mut tree = two_level_tree();
        // An orphaned node that found no split, hanging under node 2.
        tree.push(Node::Decided {
            parent: Some(NodeIndex::new(2)),
            depth: 2,
            split: None,
            children: [None, None],
        });
        assert_eq!(leaf_depth(&tree, 5, 0, &frame).unwrap(), 2);
    }

    #[test]
    fn out_of_range_node_is_corrupt() {
        let frame = Frame::new(vec![Column::numeric("x", vec![1.0])]).unwrap();
        let tree = two_level_tree();
        assert!(matches!(
            leaf_depth(&tree, 42, 0, &frame),
            Err(ForestError::CorruptRowState { nid: 42, .. })
        ));
    }
}
