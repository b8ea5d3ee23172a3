//! CSV ingestion and report writing for the solitude pipeline.

mod domain;
mod error;
mod reader;
mod writer;

pub use domain::{Dataset, ExperimentName, RowId};
pub use error::IoError;
pub use reader::FrameReader;
pub use writer::ResultWriter;
