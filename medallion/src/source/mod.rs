//! Reading per-run export files.

mod base;
pub mod local;
mod location;
pub mod memory;
#[cfg(feature = "parquet")]
mod parquet_file;

pub use base::{SourceFile, SourceReader};
pub use location::{FilesRootResolver, LocationResolver, export_path};
