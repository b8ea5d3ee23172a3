//! Domain types for solitude-io.

use solitude_forest::Frame;

use crate::IoError;

/// Identifier of one input row.
///
/// Taken from the id column when one is configured, otherwise the
/// zero-based row number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowId(String);

impl RowId {
    pub(crate) fn new(id: String) -> Self {
        Self(id)
    }

    /// Return the row ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated experiment name for output file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rows read from a CSV file: their ids and the feature frame.
///
/// `row_ids[i]` identifies row `i` of `frame`.
#[derive(Debug)]
pub struct Dataset {
    row_ids: Vec<RowId>,
    frame: Frame,
}

impl Dataset {
    pub(crate) fn new(row_ids: Vec<RowId>, frame: Frame) -> Self {
        Self { row_ids, frame }
    }

    /// Return the row IDs.
    #[must_use]
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Return the feature frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Return the number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_name_charset() {
        assert!(ExperimentName::new("run_01-a".into()).is_ok());
        assert!(ExperimentName::new(String::new()).is_err());
        assert!(matches!(
            ExperimentName::new("bad/name".into()),
            Err(IoError::InvalidExperimentName { .. })
        ));
    }
}
