//! Anomaly scores from average path lengths.

use rayon::prelude::*;

use crate::error::ForestError;
use crate::forest::IsolationForest;
use crate::frame::Frame;
use crate::path::PackedPath;

/// Euler–Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Score of one row.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnomalyScore {
    /// Average path length over the trees that scored the row.
    pub raw: f64,
    /// `2^(-raw / c(n))`, in `(0, 1]`. Higher means more anomalous.
    pub normalized: f64,
}

/// Expected path length `c(n)` of an unsuccessful search in a random binary
/// tree built from `n` points. Zero for `n <= 1`.
#[must_use]
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

/// Map an average path length onto `(0, 1]` for trees grown from
/// `sample_size` rows.
#[must_use]
pub fn normalize_path_length(avg: f64, sample_size: usize) -> f64 {
    let c = average_path_length(sample_size);
    if c <= 0.0 {
        return 1.0;
    }
    2f64.powf(-avg / c)
}

/// Out-of-bag score of a training row, `None` if it was never out of bag.
pub(crate) fn oob_score(packed: PackedPath, oob_count: u32, sample_size: usize) -> Option<AnomalyScore> {
    if oob_count == 0 {
        return None;
    }
    let raw = f64::from(packed.oob) / f64::from(oob_count);
    Some(AnomalyScore {
        raw,
        normalized: normalize_path_length(raw, sample_size),
    })
}

impl IsolationForest {
    /// Score one row.
    ///
    /// Cells are laid out as in the training frame: categorical cells hold
    /// level codes, `NaN` marks a missing value. Missing values and unseen
    /// levels follow each node's default direction.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::PredictionFeatureMismatch`] if `row` does not
    /// have one cell per training column.
    pub fn score(&self, row: &[f64]) -> Result<AnomalyScore, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        Ok(self.score_unchecked(row))
    }

    fn score_unchecked(&self, row: &[f64]) -> AnomalyScore {
        let trees = self.graph.trees();
        let raw = if trees.is_empty() {
            0.0
        } else {
            trees.iter().map(|t| t.path_length(row)).sum::<f64>() / trees.len() as f64
        };
        AnomalyScore {
            raw,
            normalized: normalize_path_length(raw, self.sample_size),
        }
    }

    /// Score many rows in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::PredictionFeatureMismatch`] for the first row
    /// of the wrong width.
    pub fn score_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<AnomalyScore>, ForestError> {
        if let Some(bad) = rows.iter().find(|r| r.len() != self.n_features) {
            return Err(ForestError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: bad.len(),
            });
        }
        Ok(rows.par_iter().map(|r| self.score_unchecked(r)).collect())
    }

    /// Score every row of a frame laid out like the training frame.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::PredictionFeatureMismatch`] if the frame has a
    /// different number of columns.
    pub fn score_frame(&self, frame: &Frame) -> Result<Vec<AnomalyScore>, ForestError> {
        if frame.n_cols() != self.n_features {
            return Err(ForestError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: frame.n_cols(),
            });
        }
        Ok((0..frame.n_rows())
            .into_par_iter()
            .map(|i| self.score_unchecked(&frame.row(i)))
            .collect())
    }

    /// Min-max score of an average path length against the extremes of the
    /// accumulated training path lengths.
    ///
    /// Returns `1.0` when every training row accumulated the same length.
    #[must_use]
    pub fn relative_score(&self, avg_path_length: f64) -> f64 {
        let (min, max) = (f64::from(self.min_path_length), f64::from(self.max_path_length));
        if max > min {
            (max - avg_path_length * self.ntrees() as f64) / (max - min)
        } else {
            1.0
        }
    }
}
