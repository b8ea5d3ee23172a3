//! Split search over frontier histograms and the row routing rule.

use fixedbitset::FixedBitSet;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::frame::ValueRange;
use crate::histogram::{HistSpec, Histogram, Moments};
use crate::node::FeatureIndex;

/// How a split separates non-missing values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SplitRule {
    /// Go right when `value >= threshold`.
    Numeric {
        /// Lower edge of the right-hand side. `NaN` for NA-vs-rest splits.
        threshold: f64,
    },
    /// Go right when the level is in the inclusion set.
    Categorical {
        /// Level code of bit 0.
        offset: usize,
        /// Inclusion set over levels `offset..offset + bits.len()`.
        bits: FixedBitSet,
        /// Number of levels in the training domain of the column.
        domain_len: usize,
    },
}

impl SplitRule {
    /// Level code of `value`, if it is a known level covered by the set.
    fn level(&self, value: f64) -> Option<usize> {
        match self {
            SplitRule::Numeric { .. } => None,
            SplitRule::Categorical {
                offset,
                bits,
                domain_len,
            } => {
                if value.is_nan() || value < 0.0 {
                    return None;
                }
                let level = value as usize;
                (level < *domain_len && level >= *offset && level - offset < bits.len()).then_some(level)
            }
        }
    }

    /// Whether categorical level `level` is in the inclusion set.
    #[must_use]
    pub fn contains(&self, level: usize) -> bool {
        match self {
            SplitRule::Categorical { offset, bits, .. } => {
                level >= *offset && bits.contains(level - offset)
            }
            SplitRule::Numeric { .. } => false,
        }
    }

    /// Whether categorical level `level` is covered by the inclusion set's range.
    #[must_use]
    pub fn in_range(&self, level: usize) -> bool {
        match self {
            SplitRule::Categorical { offset, bits, .. } => {
                level >= *offset && level - offset < bits.len()
            }
            SplitRule::Numeric { .. } => false,
        }
    }
}

/// Decide the side a value takes at a split.
///
/// A missing value, or a categorical value outside the inclusion set's
/// known range, goes right exactly when `leftward` is false. Any other value
/// goes right only for a regular (not NA-vs-rest) split, and then when it is
/// `>= threshold` or a member of the inclusion set.
#[must_use]
pub fn route_right(rule: &SplitRule, leftward: bool, na_vs_rest: bool, value: f64) -> bool {
    let known = match rule {
        SplitRule::Numeric { .. } => !value.is_nan(),
        SplitRule::Categorical { .. } => rule.level(value).is_some(),
    };
    if !known {
        return !leftward;
    }
    if na_vs_rest {
        return false;
    }
    match rule {
        SplitRule::Numeric { threshold } => value >= *threshold,
        SplitRule::Categorical { .. } => rule.level(value).is_some_and(|level| rule.contains(level)),
    }
}

/// A chosen split of one node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Split {
    pub(crate) col: FeatureIndex,
    pub(crate) rule: SplitRule,
    /// Direction of missing and unseen values: `true` sends them left.
    pub(crate) leftward: bool,
    /// Missing values on one side, everything else on the other.
    pub(crate) na_vs_rest: bool,
    /// In-bag rows routed left.
    pub(crate) n0: f64,
    /// In-bag rows routed right.
    pub(crate) n1: f64,
}

impl Split {
    /// Column the split tests.
    #[must_use]
    pub fn col(&self) -> FeatureIndex {
        self.col
    }

    /// Threshold or inclusion set.
    #[must_use]
    pub fn rule(&self) -> &SplitRule {
        &self.rule
    }

    /// Rows sent left (`n0`) and right (`n1`) while growing.
    #[must_use]
    pub fn counts(&self) -> (f64, f64) {
        (self.n0, self.n1)
    }

    /// Whether a row with `value` in the split column goes right.
    #[must_use]
    pub fn goes_right(&self, value: f64) -> bool {
        route_right(&self.rule, self.leftward, self.na_vs_rest, value)
    }
}

/// A split together with what each child can still see of the split column.
#[derive(Debug, Clone)]
pub(crate) struct SplitCandidate {
    pub(crate) split: Split,
    pub(crate) left_range: ValueRange,
    pub(crate) right_range: ValueRange,
}

/// Evaluate the possible placements of missing rows for one partition of
/// the non-missing bins and keep the best valid one in `best`.
fn consider(
    best: &mut Option<(f64, bool, Moments, Moments)>,
    left: Moments,
    right: Moments,
    na: Moments,
    min_rows: f64,
) {
    let mut options = Vec::with_capacity(2);
    if na.w > 0.0 {
        options.push((left.plus(&na), right, true));
        options.push((left, right.plus(&na), false));
    } else {
        // No missing rows reached the node: missing values follow the heavier side.
        options.push((left, right, left.w > right.w));
    }
    for (l, r, leftward) in options {
        if l.w < min_rows || r.w < min_rows {
            continue;
        }
        let sse = l.sse() + r.sse();
        if best.as_ref().is_none_or(|(b, ..)| sse < *b) {
            *best = Some((sse, leftward, l, r));
        }
    }
}

/// Best split of a single column, or `None` if nothing reduces the error.
pub(crate) fn best_split_for(
    hist: &Histogram,
    domain_len: Option<usize>,
    min_rows: f64,
) -> Option<SplitCandidate> {
    let nbins = hist.spec.nbins();
    if nbins <= 1 {
        return None;
    }
    let total = hist.total();
    let parent_sse = total.sse();
    // Cancellation error of `wyy - wy^2 / w` grows with `wyy`.
    let tolerance = 8.0 * f64::EPSILON * total.wyy;
    let na = hist.na;

    // Order the bins: natural order for numeric columns, by mean response
    // for categorical ones so that a prefix scan finds the best grouping.
    let mut order: Vec<usize> = (0..nbins).filter(|&b| hist.bins[b].w > 0.0).collect();
    if matches!(hist.spec, HistSpec::Categorical { .. }) {
        order.sort_by(|&a, &b| {
            hist.bins[a]
                .mean()
                .total_cmp(&hist.bins[b].mean())
                .then(a.cmp(&b))
        });
    }

    let mut best: Option<(usize, f64, bool, bool, Moments, Moments)> = None;
    let mut left = Moments::default();
    let all = order.iter().fold(Moments::default(), |acc, &b| acc.plus(&hist.bins[b]));
    for k in 1..order.len() {
        left.merge(&hist.bins[order[k - 1]]);
        let right = Moments {
            w: all.w - left.w,
            wy: all.wy - left.wy,
            wyy: all.wyy - left.wyy,
        };
        let mut here = None;
        consider(&mut here, left, right, na, min_rows);
        if let Some((sse, leftward, l, r)) = here
            && best.as_ref().is_none_or(|b| sse < b.1)
        {
            best = Some((k, sse, leftward, false, l, r));
        }
    }

    // Missing values against everything else; the missing side goes right.
    if na.w >= min_rows && all.w >= min_rows {
        let sse = all.sse() + na.sse();
        if best.as_ref().is_none_or(|b| sse < b.1) {
            best = Some((order.len(), sse, false, true, all, na));
        }
    }

    let (k, sse, leftward, na_vs_rest, l, r) = best?;
    if parent_sse - sse <= tolerance {
        return None;
    }

    let (left_bins, right_bins) = order.split_at(k);
    let left_range = hist.observed(left_bins.iter().copied());
    let right_range = hist.observed(right_bins.iter().copied());

    let rule = match hist.spec {
        HistSpec::Numeric { .. } => SplitRule::Numeric {
            threshold: if na_vs_rest {
                f64::NAN
            } else {
                hist.spec.threshold(order[k])
            },
        },
        HistSpec::Categorical { lo, hi, .. } => {
            let mut bits = FixedBitSet::with_capacity(hi - lo + 1);
            for &b in right_bins {
                let (first, last) = hist.spec.levels_of(b);
                for level in first..=last {
                    bits.insert(level - lo);
                }
            }
            SplitRule::Categorical {
                offset: lo,
                bits,
                domain_len: domain_len.unwrap_or(hi + 1),
            }
        }
    };

    Some(SplitCandidate {
        split: Split {
            col: hist.col,
            rule,
            leftward,
            na_vs_rest,
            n0: l.w,
            n1: r.w,
        },
        left_range,
        right_range,
    })
}

/// Pick a split for one node.
///
/// Candidate columns are shuffled and the first one that yields a valid
/// split wins. Columns with fewer than two bins are skipped.
pub(crate) fn select_split(
    hists: &[Histogram],
    domains: &[Option<usize>],
    min_rows: f64,
    rng: &mut impl Rng,
) -> Option<SplitCandidate> {
    let mut candidates: Vec<&Histogram> = hists.iter().filter(|h| h.spec.nbins() > 1).collect();
    candidates.shuffle(rng);
    candidates
        .into_iter()
        .find_map(|h| best_split_for(h, domains[h.col.0], min_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn numeric_split(threshold: f64, leftward: bool) -> Split {
        Split {
            col: FeatureIndex::new(2),
            rule: SplitRule::Numeric { threshold },
            leftward,
            na_vs_rest: false,
            n0: 1.0,
            n1: 1.0,
        }
    }

    fn categorical_split(levels: &[usize], domain_len: usize, leftward: bool) -> Split {
        let mut bits = FixedBitSet::with_capacity(domain_len);
        for &l in levels {
            bits.insert(l);
        }
        Split {
            col: FeatureIndex::new(0),
            rule: SplitRule::Categorical {
                offset: 0,
                bits,
                domain_len,
            },
            leftward,
            na_vs_rest: false,
            n0: 1.0,
            n1: 1.0,
        }
    }

    // --- Routing ---

    #[test]
    fn numeric_routing_boundary() {
        let split = numeric_split(5.0, false);
        assert!(!split.goes_right(4.9));
        assert!(split.goes_right(5.0));
        assert!(split.goes_right(f64::NAN));
    }

    #[test]
    fn numeric_missing_follows_leftward() {
        let split = numeric_split(5.0, true);
        assert!(!split.goes_right(f64::NAN));
        assert!(split.goes_right(7.0));
    }

    #[test]
    fn categorical_routing_membership() {
        let split = categorical_split(&[1, 3], 4, true);
        assert!(split.goes_right(3.0));
        assert!(!split.goes_right(2.0));
        assert!(!split.goes_right(9.0));
        assert!(!split.goes_right(f64::NAN));
    }

    #[test]
    fn categorical_unseen_goes_right_when_not_leftward() {
        let split = categorical_split(&[1, 3], 4, false);
        assert!(split.goes_right(9.0));
        assert!(split.goes_right(-1.0));
        assert!(!split.goes_right(0.0));
    }

    #[test]
    fn categorical_offset_bounds_known_range() {
        let mut bits = FixedBitSet::with_capacity(2);
        bits.insert(1);
        let rule = SplitRule::Categorical {
            offset: 3,
            bits,
            domain_len: 10,
        };
        // Level 4 is bit 1; level 2 lies below the set's range.
        assert!(route_right(&rule, true, false, 4.0));
        assert!(!route_right(&rule, true, false, 3.0));
        assert!(!route_right(&rule, true, false, 2.0));
        assert!(route_right(&rule, false, false, 2.0));
        assert!(rule.in_range(3));
        assert!(!rule.in_range(5));
    }

    #[test]
    fn na_vs_rest_sends_known_values_left() {
        let mut split = numeric_split(f64::NAN, false);
        split.na_vs_rest = true;
        assert!(!split.goes_right(-100.0));
        assert!(!split.goes_right(100.0));
        assert!(split.goes_right(f64::NAN));
    }

    // --- Split search ---

    fn hist_from(spec: HistSpec, rows: &[(f64, f64)]) -> Histogram {
        let mut h = Histogram::new(FeatureIndex::new(0), spec);
        for &(v, y) in rows {
            h.add(v, y);
        }
        h
    }

    #[test]
    fn numeric_split_separates_response_groups() {
        let rows: Vec<(f64, f64)> = (0..20)
            .map(|i| {
                let v = f64::from(i);
                (v, if i < 10 { 0.0 } else { 1.0 })
            })
            .collect();
        let h = hist_from(HistSpec::Numeric { min: 0.0, max: 19.0, nbins: 19 }, &rows);
        let cand = best_split_for(&h, None, 1.0).unwrap();
        let SplitRule::Numeric { threshold } = cand.split.rule else {
            panic!("expected numeric rule");
        };
        assert!((threshold - 10.0).abs() < 1e-9, "threshold {threshold}");
        assert!((cand.split.n0 - 10.0).abs() < f64::EPSILON);
        assert!((cand.split.n1 - 10.0).abs() < f64::EPSILON);
        assert_eq!(cand.left_range, ValueRange::Numeric { min: 0.0, max: 9.0 });
        assert_eq!(cand.right_range, ValueRange::Numeric { min: 10.0, max: 19.0 });
        // Every training row routes to the side it was counted on.
        for &(v, y) in &rows {
            assert_eq!(cand.split.goes_right(v), y > 0.5);
        }
    }

    #[test]
    fn min_rows_blocks_thin_sides() {
        let rows = [(0.0, 0.0), (1.0, 1.0), (2.0, 1.0)];
        let h = hist_from(HistSpec::Numeric { min: 0.0, max: 2.0, nbins: 2 }, &rows);
        assert!(best_split_for(&h, None, 2.0).is_none());
        assert!(best_split_for(&h, None, 1.0).is_some());
    }

    #[test]
    fn constant_response_never_splits() {
        let rows: Vec<(f64, f64)> = (0..10).map(|i| (f64::from(i), 0.5)).collect();
        let h = hist_from(HistSpec::Numeric { min: 0.0, max: 9.0, nbins: 4 }, &rows);
        assert!(best_split_for(&h, None, 1.0).is_none());
    }

    #[test]
    fn categorical_split_groups_by_mean() {
        // Levels 0 and 2 carry low responses, levels 1 and 3 high ones.
        let rows = [
            (0.0, 0.1),
            (0.0, 0.1),
            (1.0, 0.9),
            (1.0, 0.9),
            (2.0, 0.1),
            (2.0, 0.1),
            (3.0, 0.9),
            (3.0, 0.9),
        ];
        let h = hist_from(HistSpec::Categorical { lo: 0, hi: 3, nbins: 4 }, &rows);
        let cand = best_split_for(&h, Some(4), 1.0).unwrap();
        let rule = &cand.split.rule;
        assert!(rule.contains(1) && rule.contains(3));
        assert!(!rule.contains(0) && !rule.contains(2));
        assert_eq!(cand.left_range, ValueRange::Categorical { lo: 0, hi: 2 });
        assert_eq!(cand.right_range, ValueRange::Categorical { lo: 1, hi: 3 });
    }

    #[test]
    fn missing_rows_join_the_closer_side() {
        let mut rows: Vec<(f64, f64)> = (0..10)
            .map(|i| (f64::from(i), if i < 5 { 0.0 } else { 1.0 }))
            .collect();
        rows.extend([(f64::NAN, 1.0), (f64::NAN, 1.0)]);
        let h = hist_from(HistSpec::Numeric { min: 0.0, max: 9.0, nbins: 10 }, &rows);
        let cand = best_split_for(&h, None, 1.0).unwrap();
        assert!(!cand.split.leftward);
        assert!(!cand.split.na_vs_rest);
        assert!((cand.split.n1 - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_only_difference_gives_na_vs_rest() {
        let mut rows: Vec<(f64, f64)> = vec![(1.0, 0.0), (2.0, 0.0), (3.0, 0.0)];
        rows.extend([(f64::NAN, 1.0), (f64::NAN, 1.0)]);
        let h = hist_from(HistSpec::Numeric { min: 1.0, max: 3.0, nbins: 2 }, &rows);
        let cand = best_split_for(&h, None, 1.0).unwrap();
        assert!(cand.split.na_vs_rest);
        assert!(cand.split.goes_right(f64::NAN));
        assert!(!cand.split.goes_right(1.0));
        assert!((cand.split.n1 - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_direction_defaults_to_heavier_side() {
        let rows = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (9.0, 1.0)];
        let h = hist_from(HistSpec::Numeric { min: 0.0, max: 9.0, nbins: 3 }, &rows);
        let cand = best_split_for(&h, None, 1.0).unwrap();
        assert!(cand.split.leftward);
        assert!(!cand.split.goes_right(f64::NAN));
    }

    #[test]
    fn select_split_skips_unsplittable_columns() {
        let flat = hist_from(
            HistSpec::Numeric { min: 0.0, max: 1.0, nbins: 4 },
            &[(0.0, 0.3), (1.0, 0.3)],
        );
        let mut useful = hist_from(
            HistSpec::Numeric { min: 0.0, max: 1.0, nbins: 4 },
            &[(0.0, 0.0), (1.0, 1.0)],
        );
        useful.col = FeatureIndex::new(1);
        let hists = [flat, useful];
        for seed in 0..10 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let cand = select_split(&hists, &[None, None], 1.0, &mut rng).unwrap();
            assert_eq!(cand.split.col, FeatureIndex::new(1));
        }
    }

    #[test]
    fn select_split_returns_none_without_candidates() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(select_split(&[], &[], 1.0, &mut rng).is_none());
    }
}
