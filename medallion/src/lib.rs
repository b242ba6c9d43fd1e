//! Bronze/Silver medallion pipeline.
//!
//! Per-run export files are loaded into Bronze tables by [`bronze::BronzeLoader`], and Bronze
//! state is merged into deduplicated, soft-deleting Silver tables by [`silver::SilverMerger`].
//! Both run against any [`store::TableStore`] and report every table as a
//! [`types::ProcessingResult`].

pub mod bronze;
pub mod cdc;
pub mod classify;
pub mod columns;
pub mod error;
pub mod failpoints;
pub mod hashing;
pub mod history;
mod macros;
pub mod silver;
pub mod sink;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
