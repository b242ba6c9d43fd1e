//! Versioned table storage behind the Bronze and Silver layers.

mod base;
mod commit;
pub mod local;
pub mod memory;

pub use base::{
    DEFAULT_VACUUM_RETENTION_HOURS, MatchCondition, MatchedAction, MergeSpec, Operation,
    OperationMetrics, TableStore, TableVersion, WriteMode, WriteOptions,
};
