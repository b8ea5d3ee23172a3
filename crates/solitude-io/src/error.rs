//! I/O error types for solitude-io.

use std::path::PathBuf;

/// Errors from CSV ingestion and report writing.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the CSV file contains a header but zero data rows.
    #[error("empty dataset (no data rows) in {path}")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when no feature column is left once the id column is removed.
    #[error("no feature columns in {path}")]
    NoFeatureColumns {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when the configured id column is not in the header.
    #[error("id column \"{column}\" not found in {path}")]
    MissingIdColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// The requested id column.
        column: String,
    },

    /// Returned when a column the model was trained on is absent from the input.
    #[error("column \"{column}\" required by the model is missing from {path}")]
    MissingModelColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// Name of the absent column.
        column: String,
    },

    /// Returned when a data row has a different number of columns than the header.
    #[error("inconsistent row length in {path}: row {row_index} has {got} columns, expected {expected}")]
    InconsistentRowLength {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Expected number of columns (from header).
        expected: usize,
        /// Actual number of columns in this row.
        got: usize,
    },

    /// Returned when a cell of a numeric model column does not parse as a float.
    #[error("unparseable value in {path}: row {row_index}, column \"{column}\", raw value \"{raw}\"")]
    UnparseableValue {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Column name.
        column: String,
        /// The raw string value that failed to parse.
        raw: String,
    },

    /// Returned when the parsed columns do not form a valid frame.
    #[error("invalid data in {path}")]
    InvalidFrame {
        /// Path to the CSV file.
        path: PathBuf,
        /// Underlying validation error.
        source: solitude_forest::ForestError,
    },

    /// Returned when the experiment name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid experiment name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidExperimentName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a JSON report cannot be encoded.
    #[error("cannot encode JSON for {path}")]
    SerializeJson {
        /// Path the report was meant for.
        path: PathBuf,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },

    /// Returned when a CSV output record cannot be written.
    #[error("cannot write CSV file {path}")]
    WriteCsv {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when a result file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
