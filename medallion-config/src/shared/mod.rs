//! Shared configuration types for medallion pipelines.

mod base;
mod dag;
mod runner;
mod runplan;
mod table;
mod watermark;
mod workers;

pub use base::ValidationError;
pub use dag::{DagConfig, DagError, DagSummary, filter_retry_tables};
pub use runner::RunnerConfig;
pub use runplan::{RunPlanEntry, RunPlanError, load_runplan, source_schedule};
pub use table::{
    DEFAULT_BRONZE_SCHEMA, DEFAULT_MONTH_COLUMN, DEFAULT_SILVER_SCHEMA, DEFAULT_WINDOW_COLUMN,
    DEFAULT_YEAR_COLUMN, EnabledFlag, IncrementalConfig, LoadMode, Partitioning,
    PartitioningConfig, TableConfig, TableDefinition, TableDefinitionError, TableName,
    WindowConfig,
};
pub use watermark::{SourceWatermarks, WatermarkError, Watermarks};
pub use workers::{OptimizeFor, WorkerConfig};
