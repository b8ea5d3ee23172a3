//! Model serialization and deserialization via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::ForestError;
use crate::forest::IsolationForest;

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Versioned envelope for the serialized model.
#[derive(serde::Serialize, serde::Deserialize)]
struct ModelEnvelope {
    /// Format version for compatibility checking.
    format_version: u32,
    /// Number of trees in the ensemble.
    ntrees: usize,
    /// Number of features the model was trained on.
    n_features: usize,
    /// The serialized forest.
    forest: IsolationForest,
}

impl IsolationForest {
    /// Save the model to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding failed |
    /// | [`ForestError::WriteModel`] | file write failed |
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();

        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION,
            ntrees: self.ntrees(),
            n_features: self.n_features,
            forest: self.clone(),
        };

        let bytes = bincode::serialize(&envelope).map_err(|e| ForestError::SerializeModel { source: e })?;

        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(size_bytes = bytes.len(), ntrees = self.ntrees(), "model saved");
        Ok(())
    }

    /// Load a model from a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadModel`] | file read failed |
    /// | [`ForestError::DeserializeModel`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleModelVersion`] | format version mismatch |
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;

        let envelope: ModelEnvelope =
            bincode::deserialize(&bytes).map_err(|e| ForestError::DeserializeModel {
                path: path.to_path_buf(),
                source: e,
            })?;

        if envelope.format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: envelope.format_version,
                path: path.to_path_buf(),
            });
        }

        debug!(ntrees = envelope.ntrees, n_features = envelope.n_features, "model loaded");
        Ok(envelope.forest)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::IsolationForestConfig;
    use crate::frame::{Column, Frame};

    fn train_small_model() -> IsolationForest {
        let x: Vec<f64> = (0..60).map(|i| f64::from(i % 12)).chain([100.0]).collect();
        let level: Vec<f64> = (0..61).map(|i| f64::from(i % 3)).collect();
        let frame = Frame::new(vec![
            Column::numeric("x", x),
            Column::categorical("c", vec!["a".into(), "b".into(), "c".into()], level),
        ])
        .unwrap();
        IsolationForestConfig::new(6)
            .unwrap()
            .with_seed(42)
            .with_sample_size(32)
            .with_mtries(-2)
            .fit(&frame)
            .unwrap()
            .into_model()
    }

    #[test]
    fn round_trip_identical_scores() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("model.bin");

        let forest = train_small_model();
        forest.save(&model_path).unwrap();
        let loaded = IsolationForest::load(&model_path).unwrap();

        assert_eq!(loaded.ntrees(), forest.ntrees());
        assert_eq!(loaded.feature_names(), forest.feature_names());
        for row in [[1.5, 0.0], [100.0, 2.0], [f64::NAN, 1.0], [3.0, 7.0]] {
            assert_eq!(forest.score(&row).unwrap(), loaded.score(&row).unwrap(), "row {row:?}");
        }
    }

    #[test]
    fn version_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.bin");
        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION + 1,
            ntrees: 0,
            n_features: 0,
            forest: train_small_model(),
        };
        std::fs::write(&path, bincode::serialize(&envelope).unwrap()).unwrap();
        let err = IsolationForest::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::IncompatibleModelVersion { found: 2, .. }));
    }

    #[test]
    fn load_nonexistent_file_error() {
        let dir = TempDir::new().unwrap();
        let err = IsolationForest::load(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, ForestError::ReadModel { .. }));
    }

    #[test]
    fn load_corrupt_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.bin");
        std::fs::write(&path, b"not a valid bincode file").unwrap();
        let err = IsolationForest::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::DeserializeModel { .. }));
    }
}
