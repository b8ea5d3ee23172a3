//! CSV reader for mixed numeric and categorical tables.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use solitude_forest::{Column, Frame, IsolationForest};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::{Dataset, RowId};

/// Cell contents read as a missing value.
const NA_TOKENS: [&str; 5] = ["", "NA", "N/A", "NaN", "nan"];

fn is_missing(raw: &str) -> bool {
    NA_TOKENS.contains(&raw.trim())
}

/// Header and raw cells of a CSV file, split into ids and feature columns.
struct RawTable {
    row_ids: Vec<RowId>,
    names: Vec<String>,
    /// Column-major raw cells: `columns[col][row]`.
    columns: Vec<Vec<String>>,
}

/// Reads a tabular dataset from a CSV file.
///
/// Expected CSV format:
/// - Header row required, one named column per feature
/// - Optionally one id column, excluded from the features
/// - Missing cells are empty or one of `NA`, `N/A`, `NaN`, `nan`
///
/// A column whose non-missing cells all parse as floats is numeric; any
/// other column is categorical, its levels sorted lexicographically.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
/// | [`IoError::MissingIdColumn`] | Configured id column not in the header |
/// | [`IoError::NoFeatureColumns`] | Only the id column is present |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::MissingModelColumn`] | Scoring input lacks a model column |
/// | [`IoError::UnparseableValue`] | Non-float cell in a numeric model column |
/// | [`IoError::InvalidFrame`] | A numeric cell is infinite |
pub struct FrameReader {
    path: PathBuf,
    id_column: Option<String>,
}

impl FrameReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            id_column: None,
        }
    }

    /// Use `column` as the row identifier instead of the row number.
    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = Some(column.into());
        self
    }

    /// Read the file, inferring each column's type.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<Dataset, IoError> {
        let raw = self.read_raw()?;
        let columns: Vec<Column> = raw
            .names
            .iter()
            .zip(&raw.columns)
            .map(|(name, cells)| infer_column(name, cells))
            .collect();
        let n_categorical = columns.iter().filter(|c| c.domain_len().is_some()).count();

        let frame = Frame::new(columns).map_err(|e| IoError::InvalidFrame {
            path: self.path.clone(),
            source: e,
        })?;

        info!(
            n_rows = frame.n_rows(),
            n_cols = frame.n_cols(),
            n_categorical,
            "dataset loaded"
        );
        Ok(Dataset::new(raw.row_ids, frame))
    }

    /// Read the file laid out like the training frame of `model`.
    ///
    /// Columns are matched by name and reordered to the model's feature
    /// order; extra columns are ignored. Categorical cells are coded against
    /// the model's training levels. A level the model never saw becomes a
    /// missing value, which every node routes the same way as an unseen
    /// level.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn read_for_model(&self, model: &IsolationForest) -> Result<Dataset, IoError> {
        let raw = self.read_raw()?;
        let position: HashMap<&str, usize> = raw
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut columns = Vec::with_capacity(model.n_features());
        let mut unseen = 0usize;
        for (name, domain) in model.feature_names().iter().zip(model.domains()) {
            let &index = position
                .get(name.as_str())
                .ok_or_else(|| IoError::MissingModelColumn {
                    path: self.path.clone(),
                    column: name.clone(),
                })?;
            let cells = &raw.columns[index];
            let column = match domain {
                Some(levels) => {
                    let codes = levels
                        .iter()
                        .enumerate()
                        .map(|(code, level)| (level.as_str(), code as f64))
                        .collect::<HashMap<_, _>>();
                    let values = cells
                        .iter()
                        .map(|cell| {
                            if is_missing(cell) {
                                return f64::NAN;
                            }
                            codes.get(cell.trim()).copied().unwrap_or_else(|| {
                                unseen += 1;
                                f64::NAN
                            })
                        })
                        .collect();
                    Column::categorical(name.clone(), levels.clone(), values)
                }
                None => {
                    let mut values = Vec::with_capacity(cells.len());
                    for (row_index, cell) in cells.iter().enumerate() {
                        if is_missing(cell) {
                            values.push(f64::NAN);
                            continue;
                        }
                        let value = cell.trim().parse::<f64>().map_err(|_| IoError::UnparseableValue {
                            path: self.path.clone(),
                            row_index,
                            column: name.clone(),
                            raw: cell.clone(),
                        })?;
                        values.push(value);
                    }
                    Column::numeric(name.clone(), values)
                }
            };
            columns.push(column);
        }

        let frame = Frame::new(columns).map_err(|e| IoError::InvalidFrame {
            path: self.path.clone(),
            source: e,
        })?;

        info!(n_rows = frame.n_rows(), unseen_levels = unseen, "scoring dataset loaded");
        Ok(Dataset::new(raw.row_ids, frame))
    }

    fn read_raw(&self) -> Result<RawTable, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) so that our own InconsistentRowLength check fires
        // instead of a low-level CsvParse error.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        })?;
        let header: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
        let expected = header.len();

        let id_index = match &self.id_column {
            Some(column) => Some(header.iter().position(|h| h == column).ok_or_else(|| {
                IoError::MissingIdColumn {
                    path: self.path.clone(),
                    column: column.clone(),
                }
            })?),
            None => None,
        };
        let feature_indices: Vec<usize> = (0..expected).filter(|&i| Some(i) != id_index).collect();
        if feature_indices.is_empty() {
            return Err(IoError::NoFeatureColumns {
                path: self.path.clone(),
            });
        }
        debug!(expected, id_column = ?self.id_column, "read CSV header");

        let mut row_ids = Vec::new();
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); feature_indices.len()];
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| IoError::CsvParse {
                path: self.path.clone(),
                offset: e.position().map_or(0, |p| p.byte()),
                source: e,
            })?;
            if record.len() != expected {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected,
                    got: record.len(),
                });
            }

            let id = match id_index {
                Some(i) => record.get(i).unwrap_or_default().to_string(),
                None => row_index.to_string(),
            };
            row_ids.push(RowId::new(id));
            for (column, &i) in columns.iter_mut().zip(&feature_indices) {
                column.push(record.get(i).unwrap_or_default().to_string());
            }
        }

        if row_ids.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        let names = feature_indices.iter().map(|&i| header[i].clone()).collect();
        Ok(RawTable {
            row_ids,
            names,
            columns,
        })
    }
}

/// Build a numeric column if every present cell parses, a categorical one otherwise.
fn infer_column(name: &str, cells: &[String]) -> Column {
    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|cell| {
            if is_missing(cell) {
                Some(f64::NAN)
            } else {
                cell.trim().parse::<f64>().ok()
            }
        })
        .collect();
    if let Some(values) = parsed {
        return Column::numeric(name, values);
    }

    let levels: BTreeSet<&str> = cells
        .iter()
        .filter(|c| !is_missing(c))
        .map(|c| c.trim())
        .collect();
    let code: HashMap<&str, f64> = levels.iter().enumerate().map(|(i, &l)| (l, i as f64)).collect();
    let values = cells
        .iter()
        .map(|c| {
            if is_missing(c) {
                f64::NAN
            } else {
                code.get(c.trim()).copied().unwrap_or(f64::NAN)
            }
        })
        .collect();
    let domain = levels.into_iter().map(str::to_string).collect();
    Column::categorical(name, domain, values)
}
