//! Per-row working columns owned by the tree currently being grown.

/// Node id of the root carried by an out-of-bag row.
pub(crate) const OUT_OF_BAG: i32 = -2;

/// Encode node `nid` as reached by an out-of-bag row.
#[inline]
pub(crate) fn nid_to_oob(nid: i32) -> i32 {
    -nid - 2
}

/// Recover the node id from an out-of-bag encoding.
#[inline]
pub(crate) fn oob_to_nid(oob: i32) -> i32 {
    -oob - 2
}

/// Whether a raw node id carries the out-of-bag flag.
#[inline]
pub(crate) fn is_oob(raw: i32) -> bool {
    raw <= OUT_OF_BAG
}

/// Split a raw node id into its logical id and out-of-bag flag.
#[inline]
pub(crate) fn unwrap_nid(raw: i32) -> (i32, bool) {
    if is_oob(raw) {
        (oob_to_nid(raw), true)
    } else {
        (raw, false)
    }
}

/// Re-apply the out-of-bag flag, if any, to a new node id.
#[inline]
pub(crate) fn rewrap_nid(nid: i32, oob: bool) -> i32 {
    if oob { nid_to_oob(nid) } else { nid }
}

/// Working columns for every training row.
///
/// `nids` and `response` are rewritten for each tree. `path` and `oob_count`
/// accumulate across the whole training run.
#[derive(Debug, Clone)]
pub(crate) struct RowState {
    /// Current node id, out-of-bag rows encoded with [`nid_to_oob`].
    pub(crate) nids: Vec<i32>,
    /// Random response placeholder for the tree being grown.
    pub(crate) response: Vec<f64>,
    /// Packed path lengths, see [`crate::path::PackedPath`].
    pub(crate) path: Vec<u64>,
    /// Number of trees for which the row was out of bag.
    pub(crate) oob_count: Vec<u32>,
}

impl RowState {
    pub(crate) fn new(n_rows: usize) -> Self {
        Self {
            nids: vec![0; n_rows],
            response: vec![0.0; n_rows],
            path: vec![0; n_rows],
            oob_count: vec![0; n_rows],
        }
    }

    pub(crate) fn n_rows(&self) -> usize {
        self.nids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oob_encoding_round_trips() {
        for nid in [0, 1, 7, 1_000_000] {
            let raw = nid_to_oob(nid);
            assert!(is_oob(raw));
            assert_eq!(oob_to_nid(raw), nid);
            assert_eq!(unwrap_nid(raw), (nid, true));
            assert_eq!(rewrap_nid(nid, true), raw);
        }
    }

    #[test]
    fn root_oob_is_sentinel() {
        assert_eq!(nid_to_oob(0), OUT_OF_BAG);
    }

    #[test]
    fn in_bag_ids_are_not_oob() {
        assert!(!is_oob(0));
        assert!(!is_oob(12));
        // -1 is the unreachable-child marker, never an OOB row.
        assert!(!is_oob(-1));
        assert_eq!(unwrap_nid(5), (5, false));
    }
}
