use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use medallion_config::shared::TableName;
use serde::{Deserialize, Serialize};

use crate::error::MedallionResult;
use crate::types::{Cell, RowSet};

/// How a write treats rows already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Adds rows to the table. The column set must match the table's.
    Append,
    /// Replaces every row of the table.
    Overwrite,
}

/// Options of [`TableStore::write_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub mode: WriteMode,
    /// Columns the table is partitioned by. Applied when the write creates or replaces the table.
    pub partition_by: Vec<String>,
    /// Allows an overwrite to replace the table's columns and partitioning.
    pub overwrite_schema: bool,
}

impl WriteOptions {
    pub fn append() -> Self {
        Self {
            mode: WriteMode::Append,
            partition_by: Vec::new(),
            overwrite_schema: false,
        }
    }

    pub fn overwrite() -> Self {
        Self {
            mode: WriteMode::Overwrite,
            partition_by: Vec::new(),
            overwrite_schema: false,
        }
    }

    pub fn with_partition_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_overwrite_schema(mut self, overwrite_schema: bool) -> Self {
        self.overwrite_schema = overwrite_schema;
        self
    }
}

/// Predicate deciding whether a matched target row is rewritten.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCondition {
    Always,
    /// Source and target values of the column differ. A column missing on one side reads as null.
    ColumnDiffers(String),
    /// The target row holds the given value in the column.
    TargetEquals(String, Cell),
    Any(Vec<MatchCondition>),
}

/// Change applied to a matched target row.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchedAction {
    /// Copies every source column onto the target, except the preserved ones.
    UpdateAll { preserve: Vec<String> },
    /// Sets fixed values and leaves every other column untouched.
    Assign(Vec<(String, Cell)>),
}

/// Key-matched conditional upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSpec {
    /// Columns matching source rows to target rows.
    pub keys: Vec<String>,
    pub when_matched: Option<(MatchCondition, MatchedAction)>,
    /// Inserts source rows whose key has no target row.
    pub insert_unmatched: bool,
}

impl MergeSpec {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            when_matched: None,
            insert_unmatched: false,
        }
    }

    pub fn when_matched(mut self, condition: MatchCondition, action: MatchedAction) -> Self {
        self.when_matched = Some((condition, action));
        self
    }

    pub fn insert_unmatched(mut self) -> Self {
        self.insert_unmatched = true;
        self
    }
}

/// Kind of operation that produced a table version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Append,
    Overwrite,
    Merge,
    /// Rewrite of the current rows that leaves their content unchanged.
    Optimize,
}

impl From<WriteMode> for Operation {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Append => Operation::Append,
            WriteMode::Overwrite => Operation::Overwrite,
        }
    }
}

/// Row counts reported by one committed operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Rows written by the operation: added rows for writes, inserted plus updated for merges.
    pub num_output_rows: u64,
    pub num_inserted_rows: u64,
    pub num_updated_rows: u64,
    /// Matched rows left as they were.
    pub num_unchanged_rows: u64,
    /// Rows in the table after the operation.
    pub num_table_rows: u64,
}

/// Retention used by table maintenance when none is configured: one week.
pub const DEFAULT_VACUUM_RETENTION_HOURS: i64 = 168;

/// One committed version of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVersion {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub partition_by: Vec<String>,
    pub metrics: OperationMetrics,
}

/// Versioned table storage used by the Bronze and Silver layers.
///
/// Every operation on a table either commits a new version or changes nothing. Implementations
/// are shared by concurrently running table tasks, but a given table is only ever touched by
/// one task at a time.
pub trait TableStore {
    /// Returns `true` when the table has at least one committed version.
    fn table_exists(&self, table: &TableName) -> impl Future<Output = MedallionResult<bool>> + Send;

    /// Reads the latest version of the table.
    ///
    /// Fails with [`crate::error::ErrorKind::TableNotFound`] when the table does not exist.
    fn read_table(&self, table: &TableName) -> impl Future<Output = MedallionResult<RowSet>> + Send;

    /// Writes rows, creating the table when needed.
    fn write_table(
        &self,
        table: &TableName,
        rows: RowSet,
        options: WriteOptions,
    ) -> impl Future<Output = MedallionResult<OperationMetrics>> + Send;

    /// Merges `source` into an existing table.
    fn merge(
        &self,
        table: &TableName,
        source: RowSet,
        spec: MergeSpec,
    ) -> impl Future<Output = MedallionResult<OperationMetrics>> + Send;

    /// Removes the table with all its versions. Returns whether the table existed.
    fn drop_table(&self, table: &TableName) -> impl Future<Output = MedallionResult<bool>> + Send;

    /// Returns the committed versions of the table, oldest first.
    fn history(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MedallionResult<Vec<TableVersion>>> + Send;

    /// Returns the metrics of the latest committed operation, if any.
    fn last_operation_metrics(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MedallionResult<Option<OperationMetrics>>> + Send;

    /// Returns the number of the latest committed version, or `None` for a missing table.
    fn table_version(
        &self,
        table: &TableName,
    ) -> impl Future<Output = MedallionResult<Option<u64>>> + Send;

    /// Returns the row count of the latest version, or `None` for a missing table.
    fn table_size(&self, table: &TableName)
    -> impl Future<Output = MedallionResult<Option<u64>>> + Send;

    /// Rewrites the current rows as one new [`Operation::Optimize`] version.
    ///
    /// Rows are clustered by the `zorder_by` columns when any are given, otherwise their order
    /// is kept. Fails with [`crate::error::ErrorKind::TableNotFound`] for a missing table.
    fn optimize(
        &self,
        table: &TableName,
        zorder_by: &[String],
    ) -> impl Future<Output = MedallionResult<OperationMetrics>> + Send;

    /// Deletes stored data that the latest version no longer references and that was
    /// superseded longer than `retention` ago. Returns the number of removed data files.
    fn vacuum(
        &self,
        table: &TableName,
        retention: Duration,
    ) -> impl Future<Output = MedallionResult<u64>> + Send;
}
