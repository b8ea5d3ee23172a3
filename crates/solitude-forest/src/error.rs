use std::path::PathBuf;

/// Errors from isolation forest training, scoring and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when ntrees is zero.
    #[error("ntrees must be at least 1, got {ntrees}")]
    InvalidTreeCount {
        /// The invalid ntrees value provided.
        ntrees: usize,
    },

    /// Returned when mtries is neither -2, -1 nor in [1, n_features].
    #[error("mtries must be -1 (auto), -2 (all features) or in [1, {n_features}], got {mtries}")]
    InvalidMtries {
        /// The configured mtries value.
        mtries: i32,
        /// The number of feature columns in the training frame.
        n_features: usize,
    },

    /// Returned when an explicit sample_rate is not in (0.0, 1.0].
    #[error("sample_rate must be in (0.0, 1.0], got {rate}")]
    InvalidSampleRate {
        /// The invalid sample_rate value provided.
        rate: f64,
    },

    /// Returned when sample_rate is unset and sample_size is not positive.
    #[error("sample_size must be a positive integer when sample_rate is unset, got {sample_size}")]
    InvalidSampleSize {
        /// The invalid sample_size value provided.
        sample_size: i64,
    },

    /// Returned when col_sample_rate_per_tree is not in (0.0, 1.0].
    #[error("col_sample_rate_per_tree must be in (0.0, 1.0], got {rate}")]
    InvalidColSampleRate {
        /// The invalid rate.
        rate: f64,
    },

    /// Returned when a bin count parameter is below 2.
    #[error("{parameter} must be at least 2, got {value}")]
    InvalidBinCount {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// The invalid value.
        value: usize,
    },

    /// Returned when min_rows is not a positive finite number.
    #[error("min_rows must be positive, got {min_rows}")]
    InvalidMinRows {
        /// The invalid min_rows value.
        min_rows: f64,
    },

    /// Returned when chunk_rows is zero.
    #[error("chunk_rows must be at least 1")]
    InvalidChunkRows,

    /// Returned when the user overrides the internal loss distribution.
    #[error("isolation forest fixes its distribution internally; {requested:?} cannot be requested")]
    UnsupportedDistribution {
        /// The distribution that was requested.
        requested: crate::config::Distribution,
    },

    /// Returned when the training frame has zero rows.
    #[error("training frame has zero rows")]
    EmptyDataset,

    /// Returned when the training frame has zero feature columns.
    #[error("training frame has zero feature columns")]
    ZeroFeatures,

    /// Returned when a column has a different length than the first column.
    #[error("column {column} has {got} rows, expected {expected}")]
    ColumnLengthMismatch {
        /// Name of the offending column.
        column: String,
        /// The expected row count.
        expected: usize,
        /// The actual row count.
        got: usize,
    },

    /// Returned when a categorical cell is not an integral code inside its domain.
    #[error("column {column}, row {row}: {value} is not a level code in [0, {domain_size})")]
    InvalidCategoricalCode {
        /// Name of the categorical column.
        column: String,
        /// Zero-based row index.
        row: usize,
        /// The offending cell value.
        value: f64,
        /// Number of levels in the column's domain.
        domain_size: usize,
    },

    /// Returned when a numeric cell is infinite (NaN is a missing value, infinity is not).
    #[error("column {column}, row {row}: infinite value")]
    InfiniteValue {
        /// Name of the numeric column.
        column: String,
        /// Zero-based row index.
        row: usize,
    },

    /// Returned when a row handed to the scorer has the wrong width.
    #[error("scoring input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The number of features the model was trained on.
        expected: usize,
        /// The number of features in the scoring input.
        got: usize,
    },

    /// Returned when a chunk finds a row assigned to a node the tree does not have.
    ///
    /// Aborts the whole training run.
    #[error("row {row} carries node id {nid}, but the tree has {n_nodes} nodes")]
    CorruptRowState {
        /// Zero-based row index.
        row: usize,
        /// The raw node id found in the row state.
        nid: i32,
        /// Number of nodes in the tree being grown.
        n_nodes: usize,
    },

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },

    /// Returned when a tree index is outside the ensemble.
    #[error("tree {index} requested, but the ensemble has {n_trees} trees")]
    TreeIndexOutOfRange {
        /// The requested tree index.
        index: usize,
        /// The number of trees in the ensemble.
        n_trees: usize,
    },
}
