//! Training result types for isolation forest.

use std::time::Duration;

use crate::forest::IsolationForest;
use crate::history::ScoringHistory;
use crate::score::AnomalyScore;
use crate::var_splits::VariableSplit;

/// Metadata about the training run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrainingMetadata {
    /// Number of trees requested.
    pub ntrees_requested: usize,
    /// Number of trees committed to the ensemble.
    pub ntrees_trained: usize,
    /// Whether an observer stopped training early.
    pub cancelled: bool,
    /// Number of training rows.
    pub n_rows: usize,
    /// Number of feature columns.
    pub n_features: usize,
    /// Resolved per-node column count.
    pub mtry: usize,
    /// Resolved per-tree column count.
    pub mtry_per_tree: usize,
    /// Resolved row sampling rate.
    pub sample_rate: f64,
    /// Expected in-bag rows per tree.
    pub sample_size: usize,
    /// Seed the forest was grown from.
    pub seed: u64,
    /// Wall-clock training time.
    pub elapsed: Duration,
}

/// Result of isolation forest training.
///
/// Contains the fitted model, per-row out-of-bag scores, the scoring
/// history and training metadata.
#[derive(Debug)]
pub struct TrainingResult {
    model: IsolationForest,
    oob_scores: Vec<Option<AnomalyScore>>,
    history: ScoringHistory,
    metadata: TrainingMetadata,
}

impl TrainingResult {
    pub(crate) fn new(
        model: IsolationForest,
        oob_scores: Vec<Option<AnomalyScore>>,
        history: ScoringHistory,
        metadata: TrainingMetadata,
    ) -> Self {
        Self {
            model,
            oob_scores,
            history,
            metadata,
        }
    }

    /// Borrow the fitted model.
    #[must_use]
    pub fn model(&self) -> &IsolationForest {
        &self.model
    }

    /// Consume the result and return the fitted model.
    #[must_use]
    pub fn into_model(self) -> IsolationForest {
        self.model
    }

    /// Out-of-bag score per training row, `None` for rows that were in bag
    /// for every tree.
    #[must_use]
    pub fn oob_scores(&self) -> &[Option<AnomalyScore>] {
        &self.oob_scores
    }

    /// One entry per committed tree.
    #[must_use]
    pub fn history(&self) -> &ScoringHistory {
        &self.history
    }

    /// Return training metadata.
    #[must_use]
    pub fn metadata(&self) -> &TrainingMetadata {
        &self.metadata
    }

    /// Variable split report in feature order.
    #[must_use]
    pub fn var_split_report(&self) -> Vec<VariableSplit> {
        self.model.var_split_report()
    }
}
