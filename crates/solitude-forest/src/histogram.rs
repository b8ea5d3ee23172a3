//! Binned response statistics for the frontier of a growing tree.
//!
//! One pass over all rows routes each row one level down its tree and folds
//! its response into the histograms of the frontier node it lands on. Each
//! chunk of rows fills its own partial histograms, which are then summed in
//! chunk order on one thread.

use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::error::ForestError;
use crate::frame::{Frame, ValueRange};
use crate::node::{FeatureIndex, Node, Tree};
use crate::row_state::{RowState, rewrap_nid, unwrap_nid};

/// Weighted response moments of a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Moments {
    pub(crate) w: f64,
    pub(crate) wy: f64,
    pub(crate) wyy: f64,
}

impl Moments {
    #[inline]
    pub(crate) fn add(&mut self, y: f64) {
        self.w += 1.0;
        self.wy += y;
        self.wyy += y * y;
    }

    #[inline]
    pub(crate) fn merge(&mut self, other: &Moments) {
        self.w += other.w;
        self.wy += other.wy;
        self.wyy += other.wyy;
    }

    #[must_use]
    pub(crate) fn plus(mut self, other: &Moments) -> Moments {
        self.merge(other);
        self
    }

    /// Sum of squared deviations from the mean.
    pub(crate) fn sse(&self) -> f64 {
        if self.w <= 0.0 {
            return 0.0;
        }
        (self.wyy - self.wy * self.wy / self.w).max(0.0)
    }

    pub(crate) fn mean(&self) -> f64 {
        if self.w > 0.0 { self.wy / self.w } else { 0.0 }
    }
}

/// Bin layout of one (node, column) histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum HistSpec {
    /// `nbins` equal-width bins over `[min, max]`.
    Numeric { min: f64, max: f64, nbins: usize },
    /// Level codes `lo..=hi`, grouped evenly into `nbins` bins.
    Categorical { lo: usize, hi: usize, nbins: usize },
}

impl HistSpec {
    /// Bin layout for a column range, or `None` if the range cannot split.
    pub(crate) fn for_range(range: ValueRange, nbins: usize, nbins_cats: usize) -> Option<Self> {
        if !range.is_splittable() {
            return None;
        }
        match range {
            ValueRange::Numeric { min, max } => Some(HistSpec::Numeric { min, max, nbins }),
            ValueRange::Categorical { lo, hi } => Some(HistSpec::Categorical {
                lo,
                hi,
                nbins: (hi - lo + 1).min(nbins_cats),
            }),
            ValueRange::Empty => None,
        }
    }

    pub(crate) fn nbins(&self) -> usize {
        match *self {
            HistSpec::Numeric { nbins, .. } | HistSpec::Categorical { nbins, .. } => nbins,
        }
    }

    /// Lower edge of numeric bin `b`; rows in bins `>= b` satisfy `value >= threshold(b)`.
    pub(crate) fn threshold(&self, b: usize) -> f64 {
        match *self {
            HistSpec::Numeric { min, max, nbins } => min + b as f64 * ((max - min) / nbins as f64),
            HistSpec::Categorical { .. } => f64::NAN,
        }
    }

    /// Bin of a non-missing value.
    pub(crate) fn bin(&self, value: f64) -> usize {
        match *self {
            HistSpec::Numeric { min, max, nbins } => {
                let step = (max - min) / nbins as f64;
                let mut b = (((value - min) / step).floor().max(0.0) as usize).min(nbins - 1);
                // Pin the bin to the threshold comparisons used for routing.
                while b + 1 < nbins && value >= self.threshold(b + 1) {
                    b += 1;
                }
                while b > 0 && value < self.threshold(b) {
                    b -= 1;
                }
                b
            }
            HistSpec::Categorical { lo, hi, nbins } => {
                let level = (value.max(0.0) as usize).clamp(lo, hi);
                (level - lo) * nbins / (hi - lo + 1)
            }
        }
    }

    /// Inclusive level span covered by categorical bin `b`.
    pub(crate) fn levels_of(&self, b: usize) -> (usize, usize) {
        match *self {
            HistSpec::Categorical { lo, hi, nbins } => {
                let count = hi - lo + 1;
                let first = (b * count).div_ceil(nbins);
                let last = ((b + 1) * count).div_ceil(nbins) - 1;
                (lo + first, lo + last)
            }
            HistSpec::Numeric { .. } => (0, 0),
        }
    }
}

/// Response statistics of one column at one frontier node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Histogram {
    pub(crate) col: FeatureIndex,
    pub(crate) spec: HistSpec,
    pub(crate) bins: Vec<Moments>,
    /// Smallest value seen per bin.
    pub(crate) mins: Vec<f64>,
    /// Largest value seen per bin.
    pub(crate) maxs: Vec<f64>,
    /// Rows whose value is missing.
    pub(crate) na: Moments,
}

impl Histogram {
    pub(crate) fn new(col: FeatureIndex, spec: HistSpec) -> Self {
        let nbins = spec.nbins();
        Self {
            col,
            spec,
            bins: vec![Moments::default(); nbins],
            mins: vec![f64::INFINITY; nbins],
            maxs: vec![f64::NEG_INFINITY; nbins],
            na: Moments::default(),
        }
    }

    pub(crate) fn add(&mut self, value: f64, y: f64) {
        if value.is_nan() {
            self.na.add(y);
            return;
        }
        let b = self.spec.bin(value);
        self.bins[b].add(y);
        self.mins[b] = self.mins[b].min(value);
        self.maxs[b] = self.maxs[b].max(value);
    }

    pub(crate) fn merge(&mut self, other: &Histogram) {
        for (a, b) in self.bins.iter_mut().zip(&other.bins) {
            a.merge(b);
        }
        for (a, &b) in self.mins.iter_mut().zip(&other.mins) {
            *a = a.min(b);
        }
        for (a, &b) in self.maxs.iter_mut().zip(&other.maxs) {
            *a = a.max(b);
        }
        self.na.merge(&other.na);
    }

    /// Moments of every row, missing ones included.
    pub(crate) fn total(&self) -> Moments {
        self.bins.iter().fold(self.na, |acc, m| acc.plus(m))
    }

    /// Observed range over the bins in `bins`.
    pub(crate) fn observed<I: IntoIterator<Item = usize>>(&self, bins: I) -> ValueRange {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        let mut lo_level = usize::MAX;
        let mut hi_level = 0;
        let mut any = false;
        for b in bins {
            if self.bins[b].w <= 0.0 {
                continue;
            }
            any = true;
            lo = lo.min(self.mins[b]);
            hi = hi.max(self.maxs[b]);
            let (first, last) = self.spec.levels_of(b);
            lo_level = lo_level.min(first.max(self.mins[b] as usize));
            hi_level = hi_level.max(last.min(self.maxs[b] as usize));
        }
        if !any {
            return ValueRange::Empty;
        }
        match self.spec {
            HistSpec::Numeric { .. } => ValueRange::Numeric { min: lo, max: hi },
            HistSpec::Categorical { .. } => ValueRange::Categorical {
                lo: lo_level,
                hi: hi_level,
            },
        }
    }
}

/// Histograms of the frontier nodes `layer_start..tree.len()`, one entry per node.
pub(crate) type LayerHistograms = Vec<Vec<Histogram>>;

fn empty_layer(tree: &Tree, layer_start: usize) -> LayerHistograms {
    (layer_start..tree.len())
        .map(|i| match tree.node(i) {
            Node::Undecided { score_cols, .. } => score_cols
                .iter()
                .map(|&(col, spec)| Histogram::new(col, spec))
                .collect(),
            _ => Vec::new(),
        })
        .collect()
}

fn merge_layers(mut a: LayerHistograms, b: LayerHistograms) -> LayerHistograms {
    for (node_a, node_b) in a.iter_mut().zip(&b) {
        for (ha, hb) in node_a.iter_mut().zip(node_b) {
            ha.merge(hb);
        }
    }
    a
}

/// Route every row one level down and accumulate the frontier histograms.
///
/// Rows sitting on a node decided in the previous layer move to the child on
/// their side of the split, keeping their out-of-bag flag. Rows whose child
/// is unreachable stay where they are. In-bag rows that land on a frontier
/// node contribute their response to that node's histograms.
///
/// # Errors
///
/// Returns [`ForestError::CorruptRowState`] if a row's node id does not
/// address a node of `tree`; the whole pass is abandoned.
#[instrument(skip_all, fields(layer_start, frontier = tree.len() - layer_start))]
pub(crate) fn build_layer(
    tree: &Tree,
    layer_start: usize,
    frame: &Frame,
    state: &mut RowState,
    chunk_rows: usize,
) -> Result<LayerHistograms, ForestError> {
    let n_nodes = tree.len();
    let response = &state.response;
    let empty = || empty_layer(tree, layer_start);

    // One partial per chunk, merged in chunk order so the float sums do not
    // depend on how rayon splits the work.
    let partials = state
        .nids
        .par_chunks_mut(chunk_rows)
        .enumerate()
        .map(|(chunk, nids)| {
            let mut acc = empty();
            let offset = chunk * chunk_rows;
            for (i, slot) in nids.iter_mut().enumerate() {
                let row = offset + i;
                let raw = *slot;
                let (mut nid, oob) = unwrap_nid(raw);
                if nid < 0 || nid as usize >= n_nodes {
                    return Err(ForestError::CorruptRowState { row, nid: raw, n_nodes });
                }
                if (nid as usize) < layer_start
                    && let Node::Decided {
                        split: Some(split),
                        children,
                        ..
                    } = tree.node(nid as usize)
                {
                    let side = usize::from(split.goes_right(frame.value(row, split.col.0)));
                    if let Some(child) = children[side] {
                        nid = child.0 as i32;
                        *slot = rewrap_nid(nid, oob);
                    }
                }
                if oob || (nid as usize) < layer_start {
                    continue;
                }
                let y = response[row];
                for hist in &mut acc[nid as usize - layer_start] {
                    hist.add(frame.value(row, hist.col.0), y);
                }
            }
            Ok(acc)
        })
        .collect::<Result<Vec<_>, ForestError>>()?;
    let layer = partials.into_iter().fold(empty(), merge_layers);

    let in_bag: f64 = layer
        .iter()
        .filter_map(|hists| hists.first())
        .map(|h| h.total().w)
        .sum();
    debug!(in_bag, "layer histograms built");
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(min: f64, max: f64, nbins: usize) -> HistSpec {
        HistSpec::Numeric { min, max, nbins }
    }

    #[test]
    fn numeric_bins_agree_with_thresholds() {
        let spec = numeric(0.0, 1.0, 7);
        for i in 0..=1000 {
            let v = f64::from(i) / 1000.0;
            let b = spec.bin(v);
            for t in 1..7 {
                assert_eq!(b >= t, v >= spec.threshold(t), "v={v} bin={b} t={t}");
            }
        }
    }

    #[test]
    fn numeric_extremes_land_in_edge_bins() {
        let spec = numeric(-2.0, 2.0, 4);
        assert_eq!(spec.bin(-2.0), 0);
        assert_eq!(spec.bin(2.0), 3);
        assert_eq!(spec.bin(0.0), 2);
    }

    #[test]
    fn categorical_one_bin_per_level_under_cap() {
        let spec = HistSpec::for_range(ValueRange::Categorical { lo: 2, hi: 5 }, 20, 1024).unwrap();
        assert_eq!(spec.nbins(), 4);
        assert_eq!(spec.bin(2.0), 0);
        assert_eq!(spec.bin(5.0), 3);
        assert_eq!(spec.levels_of(1), (3, 3));
    }

    #[test]
    fn categorical_levels_grouped_over_cap() {
        let spec = HistSpec::for_range(ValueRange::Categorical { lo: 0, hi: 9 }, 20, 4).unwrap();
        assert_eq!(spec.nbins(), 4);
        let mut covered = Vec::new();
        for b in 0..4 {
            let (first, last) = spec.levels_of(b);
            for level in first..=last {
                assert_eq!(spec.bin(level as f64), b);
                covered.push(level);
            }
        }
        assert_eq!(covered, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn constant_range_has_no_spec() {
        assert!(HistSpec::for_range(ValueRange::Numeric { min: 1.0, max: 1.0 }, 20, 8).is_none());
        assert!(HistSpec::for_range(ValueRange::Empty, 20, 8).is_none());
    }

    #[test]
    fn missing_values_fill_na_bucket() {
        let mut h = Histogram::new(FeatureIndex(0), numeric(0.0, 1.0, 2));
        h.add(f64::NAN, 0.5);
        h.add(0.2, 1.0);
        assert!((h.na.w - 1.0).abs() < f64::EPSILON);
        assert!((h.total().w - 2.0).abs() < f64::EPSILON);
        assert!((h.bins[0].wy - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_matches_single_pass() {
        let spec = numeric(0.0, 10.0, 5);
        let values = [0.5, 3.3, 9.9, 4.0, f64::NAN, 7.1, 2.2];
        let mut whole = Histogram::new(FeatureIndex(0), spec);
        let mut left = Histogram::new(FeatureIndex(0), spec);
        let mut right = Histogram::new(FeatureIndex(0), spec);
        for (i, &v) in values.iter().enumerate() {
            let y = i as f64 * 0.1;
            whole.add(v, y);
            if i % 2 == 0 { left.add(v, y) } else { right.add(v, y) }
        }
        right.merge(&left);
        assert_eq!(right.bins, whole.bins);
        assert_eq!(right.mins, whole.mins);
        assert_eq!(right.maxs, whole.maxs);
        assert_eq!(right.na, whole.na);
    }

    #[test]
    fn observed_range_covers_selected_bins() {
        let mut h = Histogram::new(FeatureIndex(0), numeric(0.0, 10.0, 5));
        for v in [0.5, 1.5, 6.0, 9.0] {
            h.add(v, 0.0);
        }
        assert_eq!(h.observed(0..2), ValueRange::Numeric { min: 0.5, max: 1.5 });
        assert_eq!(h.observed(2..5), ValueRange::Numeric { min: 6.0, max: 9.0 });
        assert_eq!(h.observed(1..2), ValueRange::Empty);
    }

    #[test]
    fn out_of_bag_rows_stay_out_of_histograms() {
        // Rows 10..13 are out of bag and far outside the in-bag values.
        let mut values: Vec<f64> = (0..10).map(f64::from).collect();
        values.extend([1000.0, -1000.0, f64::NAN]);
        let frame = Frame::new(vec![crate::frame::Column::numeric("x", values)]).unwrap();
        let spec = numeric(-1000.0, 1000.0, 4);
        let mut tree = Tree::new(vec![FeatureIndex(0)]);
        tree.push(Node::Undecided {
            parent: None,
            depth: 0,
            nbins: 4,
            ranges: frame.ranges(),
            score_cols: vec![(FeatureIndex(0), spec)],
        });

        let mut state = RowState::new(frame.n_rows());
        state.response = vec![1.0; frame.n_rows()];
        for row in 10..13 {
            state.nids[row] = crate::row_state::nid_to_oob(0);
        }
        let layer = build_layer(&tree, 0, &frame, &mut state, 4).unwrap();

        let h = &layer[0][0];
        assert!((h.total().w - 10.0).abs() < f64::EPSILON);
        assert_eq!(h.na, Moments::default());
        assert_eq!(h.observed(0..4), ValueRange::Numeric { min: 0.0, max: 9.0 });
        assert_eq!(h.bins[0].w, 0.0);
        assert_eq!(h.bins[3].w, 0.0);
        assert!(state.nids[10..].iter().all(|&nid| nid == crate::row_state::OUT_OF_BAG));
    }

    #[test]
    fn moments_sse() {
        let mut m = Moments::default();
        for y in [1.0, 2.0, 3.0] {
            m.add(y);
        }
        assert!((m.sse() - 2.0).abs() < 1e-12);
        assert!((m.mean() - 2.0).abs() < 1e-12);
        assert_eq!(Moments::default().sse(), 0.0);
    }
}
