//! Configuration builder for isolation forest training.

use std::ops::ControlFlow;

use rand::Rng;

use crate::error::ForestError;
use crate::frame::Frame;
use crate::history::{HistoryEntry, TreeObserver};
use crate::result::TrainingResult;

/// Loss distribution requested by the caller.
///
/// Isolation forest grows its trees against a random uniform response with a
/// squared-error criterion, so only [`Distribution::Auto`] and
/// [`Distribution::Gaussian`] are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Distribution {
    /// Let the algorithm choose (resolves to `Gaussian`).
    Auto,
    /// Squared-error loss.
    Gaussian,
    /// Binomial log-loss.
    Bernoulli,
    /// Multinomial log-loss.
    Multinomial,
    /// Poisson deviance.
    Poisson,
    /// Absolute-error loss.
    Laplace,
    /// Huber loss.
    Huber,
}

/// Which rule `mtries = -1` follows when sizing the per-node column subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProblemStyle {
    /// `max(1, floor(sqrt(features)))`.
    Classification,
    /// `max(1, floor(features / 3))`.
    Regression,
}

/// Configuration for isolation forest training.
///
/// Construct via [`IsolationForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter                  | Default        |
/// |----------------------------|----------------|
/// | `max_depth`                | 8              |
/// | `mtries`                   | -1             |
/// | `sample_size`              | 256            |
/// | `sample_rate`              | `None`         |
/// | `col_sample_rate_per_tree` | 1.0            |
/// | `min_rows`                 | 1.0            |
/// | `nbins`                    | 20             |
/// | `nbins_top_level`          | 1024           |
/// | `nbins_cats`               | 1024           |
/// | `seed`                     | `None` (fresh) |
/// | `distribution`             | `Auto`         |
/// | `problem_style`            | `Regression`   |
/// | `chunk_rows`               | 4096           |
#[derive(Debug, Clone)]
pub struct IsolationForestConfig {
    pub(crate) ntrees: usize,
    pub(crate) max_depth: usize,
    pub(crate) mtries: i32,
    pub(crate) sample_size: i64,
    pub(crate) sample_rate: Option<f64>,
    pub(crate) col_sample_rate_per_tree: f64,
    pub(crate) min_rows: f64,
    pub(crate) nbins: usize,
    pub(crate) nbins_top_level: usize,
    pub(crate) nbins_cats: usize,
    pub(crate) seed: Option<u64>,
    pub(crate) distribution: Distribution,
    pub(crate) problem_style: ProblemStyle,
    pub(crate) chunk_rows: usize,
}

/// Parameters resolved against a concrete training frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ResolvedParams {
    pub(crate) n_features: usize,
    pub(crate) mtry: usize,
    pub(crate) mtry_per_tree: usize,
    pub(crate) sample_rate: f64,
    /// Expected number of in-bag rows per tree; the `n` of `c(n)`.
    pub(crate) sample_size: usize,
    pub(crate) seed: u64,
}

impl IsolationForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `ntrees` is zero.
    pub fn new(ntrees: usize) -> Result<Self, ForestError> {
        if ntrees == 0 {
            return Err(ForestError::InvalidTreeCount { ntrees });
        }
        Ok(Self {
            ntrees,
            max_depth: 8,
            mtries: -1,
            sample_size: 256,
            sample_rate: None,
            col_sample_rate_per_tree: 1.0,
            min_rows: 1.0,
            nbins: 20,
            nbins_top_level: 1024,
            nbins_cats: 1024,
            seed: None,
            distribution: Distribution::Auto,
            problem_style: ProblemStyle::Regression,
            chunk_rows: 4096,
        })
    }

    // --- Setters ---

    /// Set the maximum tree depth. `0` grows single-leaf trees.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the per-node column count: `-2` all, `-1` auto, otherwise `1..=features`.
    #[must_use]
    pub fn with_mtries(mut self, mtries: i32) -> Self {
        self.mtries = mtries;
        self
    }

    /// Set the absolute number of rows sampled per tree (used when no rate is set).
    #[must_use]
    pub fn with_sample_size(mut self, sample_size: i64) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Set the per-tree row sampling rate. `None` derives it from `sample_size`.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: Option<f64>) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the fraction of columns each tree may split on.
    #[must_use]
    pub fn with_col_sample_rate_per_tree(mut self, rate: f64) -> Self {
        self.col_sample_rate_per_tree = rate;
        self
    }

    /// Set the minimum number of in-bag rows on each side of a split.
    #[must_use]
    pub fn with_min_rows(mut self, min_rows: f64) -> Self {
        self.min_rows = min_rows;
        self
    }

    /// Set the minimum number of numeric histogram bins per node.
    #[must_use]
    pub fn with_nbins(mut self, nbins: usize) -> Self {
        self.nbins = nbins;
        self
    }

    /// Set the number of numeric histogram bins at the root.
    #[must_use]
    pub fn with_nbins_top_level(mut self, nbins_top_level: usize) -> Self {
        self.nbins_top_level = nbins_top_level;
        self
    }

    /// Set the maximum number of categorical histogram bins.
    #[must_use]
    pub fn with_nbins_cats(mut self, nbins_cats: usize) -> Self {
        self.nbins_cats = nbins_cats;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Request a loss distribution. Anything but `Auto`/`Gaussian` fails at fit time.
    #[must_use]
    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Select the `mtries = -1` sizing rule.
    #[must_use]
    pub fn with_problem_style(mut self, problem_style: ProblemStyle) -> Self {
        self.problem_style = problem_style;
        self
    }

    /// Set the number of rows per parallel work chunk.
    ///
    /// Row-level random streams are keyed by chunk offset, so the same seed
    /// reproduces the same forest only under the same `chunk_rows`.
    #[must_use]
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn ntrees(&self) -> usize {
        self.ntrees
    }

    /// Return the maximum depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Return the configured mtries.
    #[must_use]
    pub fn mtries(&self) -> i32 {
        self.mtries
    }

    /// Return the configured sample size.
    #[must_use]
    pub fn sample_size(&self) -> i64 {
        self.sample_size
    }

    /// Return the configured sample rate, if any.
    #[must_use]
    pub fn sample_rate(&self) -> Option<f64> {
        self.sample_rate
    }

    /// Return the per-tree column sample rate.
    #[must_use]
    pub fn col_sample_rate_per_tree(&self) -> f64 {
        self.col_sample_rate_per_tree
    }

    /// Return the minimum rows per split side.
    #[must_use]
    pub fn min_rows(&self) -> f64 {
        self.min_rows
    }

    /// Return the minimum numeric bin count.
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Return the root numeric bin count.
    #[must_use]
    pub fn nbins_top_level(&self) -> usize {
        self.nbins_top_level
    }

    /// Return the categorical bin cap.
    #[must_use]
    pub fn nbins_cats(&self) -> usize {
        self.nbins_cats
    }

    /// Return the configured seed, if any.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Return the requested distribution.
    #[must_use]
    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// Return the `mtries = -1` sizing rule.
    #[must_use]
    pub fn problem_style(&self) -> ProblemStyle {
        self.problem_style
    }

    /// Return the rows per parallel work chunk.
    #[must_use]
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Check every parameter against the training frame.
    pub(crate) fn resolve(&self, frame: &Frame) -> Result<ResolvedParams, ForestError> {
        if !matches!(self.distribution, Distribution::Auto | Distribution::Gaussian) {
            return Err(ForestError::UnsupportedDistribution {
                requested: self.distribution,
            });
        }
        for (parameter, value) in [
            ("nbins", self.nbins),
            ("nbins_top_level", self.nbins_top_level),
            ("nbins_cats", self.nbins_cats),
        ] {
            if value < 2 {
                return Err(ForestError::InvalidBinCount { parameter, value });
            }
        }
        if !(self.min_rows.is_finite() && self.min_rows > 0.0) {
            return Err(ForestError::InvalidMinRows {
                min_rows: self.min_rows,
            });
        }
        if self.chunk_rows == 0 {
            return Err(ForestError::InvalidChunkRows);
        }

        let n_rows = frame.n_rows();
        let n_features = frame.n_cols();
        let mtry = resolve_mtry(self.mtries, n_features, self.problem_style)?;

        let col_rate = self.col_sample_rate_per_tree;
        if !(col_rate > 0.0 && col_rate <= 1.0) {
            return Err(ForestError::InvalidColSampleRate { rate: col_rate });
        }
        let mtry_per_tree = ((col_rate * n_features as f64) as usize).max(1);

        let sample_rate = match self.sample_rate {
            Some(rate) => {
                if !(rate > 0.0 && rate <= 1.0) {
                    return Err(ForestError::InvalidSampleRate { rate });
                }
                rate
            }
            None => {
                if self.sample_size <= 0 {
                    return Err(ForestError::InvalidSampleSize {
                        sample_size: self.sample_size,
                    });
                }
                (self.sample_size as f64 / n_rows as f64).min(1.0)
            }
        };
        let sample_size = ((sample_rate * n_rows as f64).round() as usize).clamp(1, n_rows);

        let seed = self.seed.unwrap_or_else(|| rand::thread_rng().r#gen());

        Ok(ResolvedParams {
            n_features,
            mtry,
            mtry_per_tree,
            sample_rate,
            sample_size,
            seed,
        })
    }

    /// Train an isolation forest on the provided frame.
    ///
    /// # Errors
    ///
    /// | Variant                                  | When                                             |
    /// |------------------------------------------|--------------------------------------------------|
    /// | [`ForestError::EmptyDataset`]            | the frame has no rows                            |
    /// | [`ForestError::InvalidMtries`]           | mtries is outside {-2, -1} ∪ [1, features]       |
    /// | [`ForestError::InvalidSampleRate`]       | sample_rate is set but not in (0.0, 1.0]         |
    /// | [`ForestError::InvalidSampleSize`]       | sample_rate is unset and sample_size <= 0        |
    /// | [`ForestError::InvalidColSampleRate`]    | col_sample_rate_per_tree is not in (0.0, 1.0]    |
    /// | [`ForestError::InvalidBinCount`]         | a bin count is below 2                           |
    /// | [`ForestError::InvalidMinRows`]          | min_rows is not positive                         |
    /// | [`ForestError::UnsupportedDistribution`] | a distribution other than Auto/Gaussian was set  |
    /// | [`ForestError::CorruptRowState`]         | a chunk failed mid-training                      |
    ///
    /// Cell-level problems are rejected earlier, by [`Frame::new`].
    pub fn fit(&self, frame: &Frame) -> Result<TrainingResult, ForestError> {
        let mut unbounded = |_: &HistoryEntry| ControlFlow::Continue(());
        crate::forest::train(self, frame, &mut unbounded)
    }

    /// Train, reporting every committed tree to `observer`.
    ///
    /// The observer can stop training between trees; the trees committed so
    /// far form the returned ensemble.
    ///
    /// # Errors
    ///
    /// Same as [`IsolationForestConfig::fit`].
    pub fn fit_with_observer(
        &self,
        frame: &Frame,
        observer: &mut dyn TreeObserver,
    ) -> Result<TrainingResult, ForestError> {
        crate::forest::train(self, frame, observer)
    }
}

/// Resolve the configured `mtries` to a concrete per-node column count.
///
/// `-2` selects every column, `-1` applies the [`ProblemStyle`] rule, and any
/// other value must already lie in `[1, n_features]`.
///
/// # Errors
///
/// Returns [`ForestError::InvalidMtries`] when the value or its resolution
/// falls outside `[1, n_features]`.
pub fn resolve_mtry(
    mtries: i32,
    n_features: usize,
    style: ProblemStyle,
) -> Result<usize, ForestError> {
    let resolved = match mtries {
        -2 => n_features,
        -1 => match style {
            ProblemStyle::Classification => ((n_features as f64).sqrt() as usize).max(1),
            ProblemStyle::Regression => (n_features / 3).max(1),
        },
        m if m >= 1 => m as usize,
        _ => 0,
    };
    if resolved == 0 || resolved > n_features {
        return Err(ForestError::InvalidMtries {
            mtries,
            n_features,
        });
    }
    Ok(resolved)
}
