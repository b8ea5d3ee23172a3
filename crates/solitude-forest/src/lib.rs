//! Isolation forest anomaly detection.
//!
//! Grows randomized partitioning trees layer by layer over a columnar
//! [`Frame`] using histogram split search against a random response, tracks
//! per-row path lengths and out-of-bag scores while training, and exports each
//! tree as a compact node graph used for scoring new rows.

mod config;
mod error;
mod forest;
mod frame;
mod graph;
mod grower;
mod histogram;
mod history;
mod node;
mod path;
mod result;
mod row_state;
mod sampler;
mod score;
mod serialize;
mod split;
mod var_splits;

pub use config::{Distribution, IsolationForestConfig, ProblemStyle, resolve_mtry};
pub use error::ForestError;
pub use forest::IsolationForest;
pub use frame::{Column, ColumnKind, Frame};
pub use graph::{ForestGraph, GraphNode, TreeGraph};
pub use history::{HistoryEntry, MaxRuntime, ScoringHistory, TreeObserver};
pub use node::{FeatureIndex, NodeIndex};
pub use path::PackedPath;
pub use result::{TrainingMetadata, TrainingResult};
pub use sampler::derive_seed;
pub use score::{AnomalyScore, average_path_length, normalize_path_length};
pub use split::{Split, SplitRule, route_right};
pub use var_splits::{VarSplits, VariableSplit};
