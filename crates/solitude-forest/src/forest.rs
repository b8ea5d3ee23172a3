//! Isolation forest training driver and the fitted model.

use std::ops::ControlFlow;
use std::time::Instant;

use rand::seq::SliceRandom;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::config::{Distribution, IsolationForestConfig};
use crate::error::ForestError;
use crate::frame::{ColumnKind, Frame};
use crate::graph::{ForestGraph, TreeGraph};
use crate::grower::{GrowParams, grow_tree};
use crate::history::{HistoryEntry, ScoringHistory, TreeObserver};
use crate::node::FeatureIndex;
use crate::path::{PackedPath, PathExtremes, track_paths};
use crate::result::{TrainingMetadata, TrainingResult};
use crate::row_state::RowState;
use crate::sampler::{Stream, sample_rows, stream_rng};
use crate::score::oob_score;
use crate::var_splits::{VarSplits, VariableSplit};

/// A fitted isolation forest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IsolationForest {
    pub(crate) graph: ForestGraph,
    pub(crate) feature_names: Vec<String>,
    /// Level names per column, `None` for numeric columns.
    pub(crate) domains: Vec<Option<Vec<String>>>,
    pub(crate) n_features: usize,
    /// The `n` of `c(n)`: expected in-bag rows per tree.
    pub(crate) sample_size: usize,
    pub(crate) min_path_length: u32,
    pub(crate) max_path_length: u32,
    pub(crate) var_splits: VarSplits,
    pub(crate) distribution: Distribution,
    pub(crate) seed: u64,
}

impl IsolationForest {
    /// Node graphs of the whole ensemble.
    #[must_use]
    pub fn graph(&self) -> &ForestGraph {
        &self.graph
    }

    /// Node graph of tree `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::TreeIndexOutOfRange`] if `index >= ntrees()`.
    pub fn tree(&self, index: usize) -> Result<&TreeGraph, ForestError> {
        self.graph
            .trees()
            .get(index)
            .ok_or(ForestError::TreeIndexOutOfRange {
                index,
                n_trees: self.ntrees(),
            })
    }

    /// Number of trees in the ensemble.
    #[must_use]
    pub fn ntrees(&self) -> usize {
        self.graph.trees().len()
    }

    /// Number of feature columns the model was trained on.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Training column names.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Training level names per column, `None` for numeric columns.
    #[must_use]
    pub fn domains(&self) -> &[Option<Vec<String>>] {
        &self.domains
    }

    /// Sample size used to normalize path lengths.
    #[must_use]
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Smallest accumulated total path length over the training rows.
    #[must_use]
    pub fn min_path_length(&self) -> u32 {
        self.min_path_length
    }

    /// Largest accumulated total path length over the training rows.
    #[must_use]
    pub fn max_path_length(&self) -> u32 {
        self.max_path_length
    }

    /// Per-feature split statistics.
    #[must_use]
    pub fn var_splits(&self) -> &VarSplits {
        &self.var_splits
    }

    /// Variable split report in feature order.
    #[must_use]
    pub fn var_split_report(&self) -> Vec<VariableSplit> {
        self.var_splits.report(&self.feature_names)
    }

    /// Loss distribution the trees were grown with. Always `Gaussian`.
    #[must_use]
    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Seed the forest was grown from.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Mean out-of-bag path length and mean normalized score over every row
/// that has been out of bag at least once.
///
/// Per-chunk sums are added in chunk order.
fn oob_means(state: &RowState, sample_size: usize, chunk_rows: usize) -> (Option<f64>, Option<f64>) {
    let (raw, normalized, n) = state
        .path
        .par_chunks(chunk_rows)
        .zip(state.oob_count.par_chunks(chunk_rows))
        .map(|(paths, counts)| {
            paths
                .iter()
                .zip(counts)
                .filter_map(|(&slot, &count)| oob_score(PackedPath::decode(slot), count, sample_size))
                .fold((0.0, 0.0, 0usize), |acc, s| (acc.0 + s.raw, acc.1 + s.normalized, acc.2 + 1))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold((0.0, 0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));
    if n == 0 {
        (None, None)
    } else {
        (Some(raw / n as f64), Some(normalized / n as f64))
    }
}

/// Train the isolation forest, one tree at a time.
#[instrument(skip_all, fields(ntrees = config.ntrees, n_rows = frame.n_rows()))]
pub(crate) fn train(
    config: &IsolationForestConfig,
    frame: &Frame,
    observer: &mut dyn TreeObserver,
) -> Result<TrainingResult, ForestError> {
    let started = Instant::now();

    // --- Validate ---
    if frame.n_rows() == 0 {
        return Err(ForestError::EmptyDataset);
    }
    let params = config.resolve(frame)?;
    let n_rows = frame.n_rows();
    let names = frame.names();
    let domains: Vec<Option<Vec<String>>> = frame
        .columns()
        .iter()
        .map(|c| match c.kind() {
            ColumnKind::Numeric => None,
            ColumnKind::Categorical { domain } => Some(domain.clone()),
        })
        .collect();

    let grow = GrowParams {
        max_depth: config.max_depth,
        nbins: config.nbins,
        nbins_top_level: config.nbins_top_level,
        nbins_cats: config.nbins_cats,
        min_rows: config.min_rows,
        mtry: params.mtry,
        chunk_rows: config.chunk_rows,
        domains: domains.iter().map(|d| d.as_ref().map(Vec::len)).collect(),
    };
    let root_ranges = frame.ranges();

    info!(
        ntrees = config.ntrees,
        n_rows,
        n_features = params.n_features,
        mtry = params.mtry,
        mtry_per_tree = params.mtry_per_tree,
        sample_rate = params.sample_rate,
        seed = params.seed,
        "training isolation forest"
    );

    // --- Grow ---
    let mut state = RowState::new(n_rows);
    let mut var_splits = VarSplits::new(params.n_features);
    let mut graphs = Vec::with_capacity(config.ntrees);
    let mut history = ScoringHistory::new();
    let mut extremes = PathExtremes::EMPTY;
    let mut cancelled = false;

    for tree_index in 0..config.ntrees {
        let mut rng = stream_rng(Stream::Columns, params.seed, tree_index, 0);
        let mut cols: Vec<FeatureIndex> = (0..params.n_features).map(FeatureIndex::new).collect();
        cols.shuffle(&mut rng);
        cols.truncate(params.mtry_per_tree);
        cols.sort_unstable();

        let in_bag = sample_rows(&mut state, params.seed, tree_index, params.sample_rate, config.chunk_rows);
        let tree = grow_tree(frame, &root_ranges, cols, &grow, &mut state, &mut rng)?;
        var_splits.update_from_tree(&tree);
        extremes = track_paths(&tree, frame, &mut state, config.chunk_rows)?;
        let graph = TreeGraph::from_tree(&tree, &names, &domains);

        let (mean_path_length, mean_anomaly_score) = oob_means(&state, params.sample_size, config.chunk_rows);
        let entry = HistoryEntry {
            ntrees: tree_index + 1,
            elapsed: started.elapsed(),
            mean_path_length,
            mean_anomaly_score,
        };
        info!(
            tree = tree_index,
            in_bag,
            nodes = graph.len(),
            mean_path_length,
            mean_anomaly_score,
            "tree committed"
        );
        graphs.push(graph);

        history.push(entry.clone());
        if let ControlFlow::Break(()) = observer.on_tree(&entry) {
            cancelled = tree_index + 1 < config.ntrees;
            break;
        }
    }

    let oob_scores = state
        .path
        .par_iter()
        .zip(state.oob_count.par_iter())
        .map(|(&slot, &count)| oob_score(PackedPath::decode(slot), count, params.sample_size))
        .collect();

    debug!(
        ntrees_trained = graphs.len(),
        min_path_length = extremes.min,
        max_path_length = extremes.max,
        "training complete"
    );

    let metadata = TrainingMetadata {
        ntrees_requested: config.ntrees,
        ntrees_trained: graphs.len(),
        cancelled,
        n_rows,
        n_features: params.n_features,
        mtry: params.mtry,
        mtry_per_tree: params.mtry_per_tree,
        sample_rate: params.sample_rate,
        sample_size: params.sample_size,
        seed: params.seed,
        elapsed: started.elapsed(),
    };

    let model = IsolationForest {
        graph: ForestGraph { trees: graphs },
        feature_names: names,
        domains,
        n_features: params.n_features,
        sample_size: params.sample_size,
        min_path_length: extremes.min,
        max_path_length: extremes.max,
        var_splits,
        distribution: Distribution::Gaussian,
        seed: params.seed,
    };

    Ok(TrainingResult::new(model, oob_scores, history, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;

    fn blob_frame() -> Frame {
        let mut x: Vec<f64> = (0..200).map(|i| f64::from(i % 20) * 0.1).collect();
        let mut y: Vec<f64> = (0..200).map(|i| f64::from(i / 20) * 0.1).collect();
        x.push(50.0);
        y.push(-50.0);
        Frame::new(vec![Column::numeric("x", x), Column::numeric("y", y)]).unwrap()
    }

    fn config(ntrees: usize) -> IsolationForestConfig {
        IsolationForestConfig::new(ntrees)
            .unwrap()
            .with_seed(7)
            .with_sample_size(64)
            .with_mtries(-2)
            .with_chunk_rows(32)
    }

    #[test]
    fn trains_requested_tree_count() {
        let result = config(10).fit(&blob_frame()).unwrap();
        let model = result.model();
        assert_eq!(model.ntrees(), 10);
        assert_eq!(model.n_features(), 2);
        assert_eq!(model.distribution(), Distribution::Gaussian);
        assert_eq!(result.history().entries().len(), 10);
        assert_eq!(result.metadata().ntrees_trained, 10);
        assert!(!result.metadata().cancelled);
        assert!(model.min_path_length() <= model.max_path_length());
    }

    #[test]
    fn empty_frame_rejected() {
        let frame = Frame::new(vec![Column::numeric("x", Vec::new())]).unwrap();
        assert!(matches!(config(3).fit(&frame), Err(ForestError::EmptyDataset)));
    }

    #[test]
    fn observer_can_cancel_between_trees() {
        let mut stop_at_three = |e: &HistoryEntry| {
            if e.ntrees == 3 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        };
        let result = config(10).fit_with_observer(&blob_frame(), &mut stop_at_three).unwrap();
        assert_eq!(result.model().ntrees(), 3);
        let recorded: Vec<usize> = result.history().entries().iter().map(|e| e.ntrees).collect();
        assert_eq!(recorded, vec![1, 2, 3]);
        assert!(result.metadata().cancelled);
        assert_eq!(result.metadata().ntrees_requested, 10);
    }

    #[test]
    fn thread_count_does_not_change_the_forest() {
        let frame = blob_frame();
        let fit_on = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| config(8).with_chunk_rows(7).fit(&frame).unwrap())
        };
        let single = fit_on(1);
        let pooled = fit_on(4);
        assert_eq!(
            serde_json::to_string(single.model().graph()).unwrap(),
            serde_json::to_string(pooled.model().graph()).unwrap()
        );
        assert_eq!(single.history().entries().len(), pooled.history().entries().len());
        for (a, b) in single.history().entries().iter().zip(pooled.history().entries()) {
            assert_eq!(a.mean_path_length, b.mean_path_length);
            assert_eq!(a.mean_anomaly_score, b.mean_anomaly_score);
        }
        assert_eq!(single.oob_scores(), pooled.oob_scores());
    }

    #[test]
    fn oob_scores_cover_every_row() {
        let frame = blob_frame();
        let result = config(20).fit(&frame).unwrap();
        assert_eq!(result.oob_scores().len(), frame.n_rows());
        for score in result.oob_scores().iter().flatten() {
            assert!(score.normalized > 0.0 && score.normalized <= 1.0);
        }
        // 64 of 201 rows in bag: every row is out of bag for some tree.
        assert!(result.oob_scores().iter().all(Option::is_some));
    }

    #[test]
    fn tree_index_checked() {
        let model = config(2).fit(&blob_frame()).unwrap().into_model();
        assert!(model.tree(1).is_ok());
        assert!(matches!(
            model.tree(2),
            Err(ForestError::TreeIndexOutOfRange { index: 2, n_trees: 2 })
        ));
    }

    #[test]
    fn var_splits_record_every_split() {
        let model = config(5).fit(&blob_frame()).unwrap().into_model();
        let internal: usize = model
            .graph()
            .trees()
            .iter()
            .map(|t| t.nodes().iter().filter(|n| !n.is_leaf()).count())
            .sum();
        let counted: u64 = model.var_split_report().iter().map(|v| v.count).sum();
        assert_eq!(counted, internal as u64);
    }
}
