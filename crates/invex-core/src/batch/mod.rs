//! Batch aggregation: one outcome per input document, flattened for export.

mod result;
mod runner;

pub use result::{BatchResult, DocumentOutcome, ExportTable, ExtractionFailure};
pub use runner::{BatchInput, BatchRunner, CancelHandle, Pipeline, outcome_from_reply};
