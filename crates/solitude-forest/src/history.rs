//! Per-tree progress reporting and cancellation.

use std::ops::ControlFlow;
use std::time::Duration;

/// Snapshot taken after each committed tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    /// Trees in the ensemble so far.
    pub ntrees: usize,
    /// Time since training started.
    pub elapsed: Duration,
    /// Mean out-of-bag path length per tree over rows seen out of bag.
    /// `None` while no row has been out of bag.
    pub mean_path_length: Option<f64>,
    /// Mean normalized anomaly score over the same rows.
    pub mean_anomaly_score: Option<f64>,
}

/// Receives a [`HistoryEntry`] after every committed tree.
///
/// Returning [`ControlFlow::Break`] stops training; the trees committed so
/// far form the ensemble.
pub trait TreeObserver {
    /// Called once per committed tree.
    fn on_tree(&mut self, entry: &HistoryEntry) -> ControlFlow<()>;
}

impl<F> TreeObserver for F
where
    F: FnMut(&HistoryEntry) -> ControlFlow<()>,
{
    fn on_tree(&mut self, entry: &HistoryEntry) -> ControlFlow<()> {
        self(entry)
    }
}

/// Ordered record of every [`HistoryEntry`] of a run.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScoringHistory {
    entries: Vec<HistoryEntry>,
}

impl ScoringHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in commit order.
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub(crate) fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }
}

impl TreeObserver for ScoringHistory {
    fn on_tree(&mut self, entry: &HistoryEntry) -> ControlFlow<()> {
        self.push(entry.clone());
        ControlFlow::Continue(())
    }
}

/// Stops training once the elapsed time reaches a budget.
#[derive(Debug, Clone, Copy)]
pub struct MaxRuntime {
    budget: Duration,
}

impl MaxRuntime {
    /// Stop after `budget` has elapsed. The tree in progress when the budget
    /// runs out is still committed.
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl TreeObserver for MaxRuntime {
    fn on_tree(&mut self, entry: &HistoryEntry) -> ControlFlow<()> {
        if entry.elapsed >= self.budget {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
