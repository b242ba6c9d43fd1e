//! Concurrent execution of a layer over a source's tables and sizing of the worker pool.

mod pool;
mod profile;

pub use pool::{LayerPlan, LayerReport, run_bronze_layer, run_silver_layer};
pub use profile::choose_worker_count;
