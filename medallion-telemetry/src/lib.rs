//! Logging bootstrap for medallion binaries and tests.

pub mod tracing;
