//! Sinks receiving processing records and run summaries.

mod base;
pub mod jsonl;
pub mod memory;

pub use base::ResultSink;
