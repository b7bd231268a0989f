//! Streaming output for large result sets.
//!
//! Result pages are written straight through to the destination as they
//! arrive, so memory use is bounded by a single page.

mod merged_csv;

pub use merged_csv::{split_first_line, MergedCsvWriter};
