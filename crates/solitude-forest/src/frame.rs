//! Columnar training frame.
//!
//! Every cell is an `f64`. `NaN` marks a missing value. Categorical columns
//! store level codes `0..domain.len()` and carry their level names.

use crate::error::ForestError;

/// Logical type of a column.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ColumnKind {
    /// Real-valued column.
    Numeric,
    /// Enumerated column; cell values are indices into `domain`.
    Categorical {
        /// Level names, indexed by level code.
        domain: Vec<String>,
    },
}

/// One named column of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub(crate) name: String,
    pub(crate) kind: ColumnKind,
    pub(crate) values: Vec<f64>,
}

impl Column {
    /// Build a numeric column.
    #[must_use]
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Numeric,
            values,
        }
    }

    /// Build a categorical column from level codes and level names.
    #[must_use]
    pub fn categorical(name: impl Into<String>, domain: Vec<String>, codes: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Categorical { domain },
            values: codes,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column kind.
    #[must_use]
    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    /// Raw cell values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of levels for categorical columns, `None` for numeric ones.
    #[must_use]
    pub fn domain_len(&self) -> Option<usize> {
        match &self.kind {
            ColumnKind::Numeric => None,
            ColumnKind::Categorical { domain } => Some(domain.len()),
        }
    }
}

/// Immutable, validated collection of equally long columns.
#[derive(Debug, Clone)]
pub struct Frame {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Frame {
    /// Validate and wrap the given columns.
    ///
    /// # Errors
    ///
    /// | Variant                                  | When                                          |
    /// |------------------------------------------|-----------------------------------------------|
    /// | [`ForestError::ZeroFeatures`]            | `columns` is empty                            |
    /// | [`ForestError::ColumnLengthMismatch`]    | a column differs in length from the first one |
    /// | [`ForestError::InvalidCategoricalCode`]  | a categorical cell is not an integral level   |
    /// | [`ForestError::InfiniteValue`]           | a numeric cell is infinite                    |
    pub fn new(columns: Vec<Column>) -> Result<Self, ForestError> {
        let Some(first) = columns.first() else {
            return Err(ForestError::ZeroFeatures);
        };
        let n_rows = first.values.len();

        for column in &columns {
            if column.values.len() != n_rows {
                return Err(ForestError::ColumnLengthMismatch {
                    column: column.name.clone(),
                    expected: n_rows,
                    got: column.values.len(),
                });
            }
            match &column.kind {
                ColumnKind::Numeric => {
                    if let Some(row) = column.values.iter().position(|v| v.is_infinite()) {
                        return Err(ForestError::InfiniteValue {
                            column: column.name.clone(),
                            row,
                        });
                    }
                }
                ColumnKind::Categorical { domain } => {
                    let domain_size = domain.len();
                    let bad = column.values.iter().enumerate().find(|&(_, &v)| {
                        !v.is_nan() && (v < 0.0 || v.fract() != 0.0 || v >= domain_size as f64)
                    });
                    if let Some((row, &value)) = bad {
                        return Err(ForestError::InvalidCategoricalCode {
                            column: column.name.clone(),
                            row,
                            value,
                            domain_size,
                        });
                    }
                }
            }
        }

        Ok(Self { columns, n_rows })
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// All columns in order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.n_cols()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Column names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Cell at (`row`, `col`).
    #[inline]
    pub(crate) fn value(&self, row: usize, col: usize) -> f64 {
        self.columns[col].values[row]
    }

    /// Copy one row out of the columnar layout.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c.values[row]).collect()
    }

    /// Observed value range of each column over non-missing cells.
    ///
    /// Numeric columns report their observed min/max; categorical columns
    /// report the lowest and highest level code seen. All-missing columns
    /// report [`ValueRange::Empty`].
    pub(crate) fn ranges(&self) -> Vec<ValueRange> {
        self.columns
            .iter()
            .map(|column| {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for &v in column.values.iter().filter(|v| !v.is_nan()) {
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
                if lo > hi {
                    return ValueRange::Empty;
                }
                match column.kind {
                    ColumnKind::Numeric => ValueRange::Numeric { min: lo, max: hi },
                    ColumnKind::Categorical { .. } => ValueRange::Categorical {
                        lo: lo as usize,
                        hi: hi as usize,
                    },
                }
            })
            .collect()
    }
}

/// Values of one column that can reach a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ValueRange {
    /// Only missing values reach the node.
    Empty,
    /// Observed numeric bounds, inclusive.
    Numeric { min: f64, max: f64 },
    /// Observed level codes, inclusive.
    Categorical { lo: usize, hi: usize },
}

impl ValueRange {
    /// Whether a split on this range could separate two rows.
    pub(crate) fn is_splittable(&self) -> bool {
        match *self {
            ValueRange::Empty => false,
            ValueRange::Numeric { min, max } => min < max,
            ValueRange::Categorical { lo, hi } => lo < hi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("L{i}")).collect()
    }

    #[test]
    fn rejects_empty_column_list() {
        assert!(matches!(Frame::new(vec![]), Err(ForestError::ZeroFeatures)));
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Frame::new(vec![
            Column::numeric("a", vec![1.0, 2.0]),
            Column::numeric("b", vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ForestError::ColumnLengthMismatch { expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn rejects_out_of_domain_code() {
        let err = Frame::new(vec![Column::categorical("c", levels(2), vec![0.0, 2.0])]).unwrap_err();
        assert!(matches!(
            err,
            ForestError::InvalidCategoricalCode { row: 1, domain_size: 2, .. }
        ));
    }

    #[test]
    fn rejects_fractional_code() {
        let err = Frame::new(vec![Column::categorical("c", levels(3), vec![0.5])]).unwrap_err();
        assert!(matches!(err, ForestError::InvalidCategoricalCode { row: 0, .. }));
    }

    #[test]
    fn rejects_infinite_numeric() {
        let err = Frame::new(vec![Column::numeric("x", vec![0.0, f64::INFINITY])]).unwrap_err();
        assert!(matches!(err, ForestError::InfiniteValue { row: 1, .. }));
    }

    #[test]
    fn missing_values_are_accepted() {
        let frame = Frame::new(vec![
            Column::numeric("x", vec![f64::NAN, 1.0]),
            Column::categorical("c", levels(2), vec![1.0, f64::NAN]),
        ])
        .unwrap();
        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.n_cols(), 2);
        assert!(frame.row(0)[0].is_nan());
    }

    #[test]
    fn ranges_skip_missing() {
        let frame = Frame::new(vec![
            Column::numeric("x", vec![f64::NAN, 3.0, -1.0]),
            Column::categorical("c", levels(5), vec![4.0, 2.0, f64::NAN]),
            Column::numeric("z", vec![f64::NAN; 3]),
        ])
        .unwrap();
        let ranges = frame.ranges();
        assert_eq!(ranges[0], ValueRange::Numeric { min: -1.0, max: 3.0 });
        assert_eq!(ranges[1], ValueRange::Categorical { lo: 2, hi: 4 });
        assert_eq!(ranges[2], ValueRange::Empty);
        assert!(ranges[0].is_splittable());
        assert!(!ranges[2].is_splittable());
    }
}
