//! Per-feature split statistics accumulated over the whole forest.

use crate::node::{FeatureIndex, Tree};
use crate::split::Split;

/// One row of the variable split report.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariableSplit {
    /// Feature name.
    pub variable: String,
    /// Number of nodes that split on this feature.
    pub count: u64,
    /// Sum over those splits of `|n0 - n1| / (n0 + n1)`.
    pub aggregated_split_ratio: f64,
    /// Sum over those splits of `depth + 1`.
    pub aggregated_split_depth: u64,
}

/// Split counts, imbalance ratios and depths per feature.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VarSplits {
    split_counts: Vec<u64>,
    agg_split_ratios: Vec<f64>,
    split_depths: Vec<u64>,
}

impl VarSplits {
    /// Empty statistics for `n_features` features.
    #[must_use]
    pub fn new(n_features: usize) -> Self {
        Self {
            split_counts: vec![0; n_features],
            agg_split_ratios: vec![0.0; n_features],
            split_depths: vec![0; n_features],
        }
    }

    /// Record one split made at `depth`.
    pub fn update(&mut self, split: &Split, depth: usize) {
        let col = split.col.0;
        let (n0, n1) = (split.n0, split.n1);
        let total = n0 + n1;
        if total > 0.0 {
            self.agg_split_ratios[col] += (n0 - n1).abs() / total;
        }
        self.split_counts[col] += 1;
        self.split_depths[col] += depth as u64 + 1;
    }

    /// Record every split of a grown tree.
    pub(crate) fn update_from_tree(&mut self, tree: &Tree) {
        for node in tree.nodes() {
            if let Some(split) = node.split() {
                self.update(split, node.depth());
            }
        }
    }

    /// Number of splits on `feature`.
    #[must_use]
    pub fn count(&self, feature: FeatureIndex) -> u64 {
        self.split_counts[feature.0]
    }

    /// Aggregated imbalance ratio of `feature`.
    #[must_use]
    pub fn aggregated_ratio(&self, feature: FeatureIndex) -> f64 {
        self.agg_split_ratios[feature.0]
    }

    /// Aggregated `depth + 1` of `feature`.
    #[must_use]
    pub fn aggregated_depth(&self, feature: FeatureIndex) -> u64 {
        self.split_depths[feature.0]
    }

    /// Number of features tracked.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.split_counts.len()
    }

    /// Build the report in feature order.
    #[must_use]
    pub fn report(&self, names: &[String]) -> Vec<VariableSplit> {
        names
            .iter()
            .enumerate()
            .take(self.n_features())
            .map(|(i, name)| VariableSplit {
                variable: name.clone(),
                count: self.split_counts[i],
                aggregated_split_ratio: self.agg_split_ratios[i],
                aggregated_split_depth: self.split_depths[i],
            })
            .collect()
    }
}
