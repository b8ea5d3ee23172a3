//! JSON and CSV writers for training reports, scores and node graphs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use solitude_forest::{AnomalyScore, HistoryEntry, IsolationForest, TrainingMetadata, TrainingResult, VariableSplit};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::{ExperimentName, RowId};

/// Writes training and scoring artifacts for one experiment.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{experiment}.model`, `{experiment}_train.json`,
/// `{experiment}_scores.csv` and `{experiment}_graph.json`.
pub struct ResultWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ResultWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}{suffix}", self.experiment.as_str()))
    }

    /// Path the binary model of this experiment is saved to.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.artifact_path(".model")
    }

    /// Write the training report to `{experiment}_train.json`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SerializeJson`] | report could not be encoded |
    /// | [`IoError::WriteFile`] | file write failed |
    #[instrument(skip_all)]
    pub fn write_training(&self, result: &TrainingResult) -> Result<PathBuf, IoError> {
        let path = self.artifact_path("_train.json");
        let model = result.model();
        let report = TrainingReport {
            experiment: self.experiment.as_str(),
            metadata: result.metadata(),
            min_path_length: model.min_path_length(),
            max_path_length: model.max_path_length(),
            variable_splits: result.var_split_report(),
            scoring_history: result.history().entries(),
        };
        write_json(&path, &report)?;
        info!(path = %path.display(), "training report written");
        Ok(path)
    }

    /// Write per-row scores to `{experiment}_scores.csv`.
    ///
    /// Columns: `id, mean_length, score, relative_score`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::WriteCsv`] if a record cannot be written.
    #[instrument(skip_all, fields(n_rows = row_ids.len()))]
    pub fn write_scores(
        &self,
        model: &IsolationForest,
        row_ids: &[RowId],
        scores: &[AnomalyScore],
    ) -> Result<PathBuf, IoError> {
        let path = self.artifact_path("_scores.csv");
        let csv_err = |e: csv::Error| IoError::WriteCsv {
            path: path.clone(),
            source: e,
        };
        let mut wtr = csv::Writer::from_path(&path).map_err(csv_err)?;
        for (id, score) in row_ids.iter().zip(scores) {
            wtr.serialize(ScoreRecord {
                id: id.as_str(),
                mean_length: score.raw,
                score: score.normalized,
                relative_score: model.relative_score(score.raw),
            })
            .map_err(csv_err)?;
        }
        wtr.flush().map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        info!(path = %path.display(), "scores written");
        Ok(path)
    }

    /// Write node graphs to `{experiment}_graph.json`: one tree, or all of
    /// them when `tree` is `None`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::SerializeJson`] | graph could not be encoded |
    /// | [`IoError::WriteFile`] | file write failed |
    #[instrument(skip_all, fields(tree = ?tree))]
    pub fn write_graph(&self, model: &IsolationForest, tree: Option<usize>) -> Result<PathBuf, IoError> {
        let path = self.artifact_path("_graph.json");
        write_json(&path, &model.graph().to_json(tree))?;
        info!(path = %path.display(), "node graph written");
        Ok(path)
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| IoError::SerializeJson {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, json).map_err(|e| IoError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

#[derive(Serialize)]
struct TrainingReport<'a> {
    experiment: &'a str,
    metadata: &'a TrainingMetadata,
    min_path_length: u32,
    max_path_length: u32,
    variable_splits: Vec<VariableSplit>,
    scoring_history: &'a [HistoryEntry],
}

#[derive(Serialize)]
struct ScoreRecord<'a> {
    id: &'a str,
    mean_length: f64,
    score: f64,
    relative_score: f64,
}
