use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use chrono::{Duration, Utc};
use medallion_config::shared::TableName;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::failpoints::{LOCAL_STORE_BEFORE_LOG_APPEND, medallion_fail_point};
use crate::medallion_error;
use crate::store::base::{
    MergeSpec, Operation, OperationMetrics, TableStore, TableVersion, WriteOptions,
};
use crate::store::commit::{TableData, apply_merge, apply_optimize, apply_write};
use crate::types::RowSet;

const LOG_FILE: &str = "_log.jsonl";
const DATA_FILE_PREFIX: &str = "data-";
const DATA_FILE_SUFFIX: &str = ".json";

fn data_file_name(version: u64) -> String {
    format!("{DATA_FILE_PREFIX}{version:020}{DATA_FILE_SUFFIX}")
}

fn data_file_version(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(DATA_FILE_PREFIX)?
        .strip_suffix(DATA_FILE_SUFFIX)?
        .parse()
        .ok()
}

type TableLocks = HashMap<TableName, Arc<Mutex<()>>>;

/// Table store persisting each table in a directory under a warehouse root.
///
/// A table lives at `{root}/{schema}/{table}`. Every version writes its rows to its own
/// `data-{version}.json` file, and the version becomes visible once its [`TableVersion`] line
/// is appended to `_log.jsonl`. Readers only follow the log, so a commit interrupted between the
/// two steps leaves the previous version in place.
///
/// Writes are serialized per table. Different tables commit concurrently.
#[derive(Debug, Clone)]
pub struct LocalTableStore {
    root: PathBuf,
    table_locks: Arc<std::sync::Mutex<TableLocks>>,
}

impl LocalTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            table_locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files of `table`.
    pub fn table_path(&self, table: &TableName) -> PathBuf {
        self.root.join(table.schema()).join(table.table())
    }

    /// Data file written by `version` of `table`.
    pub fn data_file_path(&self, table: &TableName, version: u64) -> PathBuf {
        self.table_path(table).join(data_file_name(version))
    }

    fn table_lock(&self, table: &TableName) -> Arc<Mutex<()>> {
        let mut locks = self
            .table_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        locks.entry(table.clone()).or_default().clone()
    }

    async fn exists(&self, table: &TableName) -> MedallionResult<bool> {
        let log_path = self.table_path(table).join(LOG_FILE);

        Ok(tokio::fs::try_exists(&log_path).await?)
    }

    async fn load_versions(&self, table: &TableName) -> MedallionResult<Vec<TableVersion>> {
        let log_path = self.table_path(table).join(LOG_FILE);
        let contents = match tokio::fs::read_to_string(&log_path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<TableVersion>(line).map_err(|err| {
                    medallion_error!(
                        ErrorKind::CorruptTable,
                        "Unreadable table metadata",
                        format!("{}: {err}", log_path.display())
                    )
                })
            })
            .collect()
    }

    /// Loads the rows of the latest version in `versions`.
    async fn load_data(
        &self,
        table: &TableName,
        versions: &[TableVersion],
    ) -> MedallionResult<TableData> {
        let Some(latest) = versions.last() else {
            bail!(
                ErrorKind::CorruptTable,
                "Unreadable table metadata",
                format!("{} has no committed version", table)
            );
        };

        let data_path = self.data_file_path(table, latest.version);
        let contents = match tokio::fs::read(&data_path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!(
                    ErrorKind::CorruptTable,
                    "Unreadable table metadata",
                    format!("{} is missing", data_path.display())
                );
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&contents).map_err(|err| {
            medallion_error!(
                ErrorKind::CorruptTable,
                "Unreadable table metadata",
                format!("{}: {err}", data_path.display())
            )
        })
    }

    /// Loads the versions and latest rows of an existing table.
    async fn load_existing(
        &self,
        table: &TableName,
    ) -> MedallionResult<(Vec<TableVersion>, TableData)> {
        if !self.exists(table).await? {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        }
        let versions = self.load_versions(table).await?;
        let data = self.load_data(table, &versions).await?;

        Ok((versions, data))
    }

    /// Writes the data file of the next version, then appends its log entry.
    ///
    /// The log append is the commit point. Callers hold the table lock.
    async fn commit(
        &self,
        table: &TableName,
        versions: &[TableVersion],
        data: &TableData,
        operation: Operation,
        metrics: OperationMetrics,
    ) -> MedallionResult<()> {
        let table_path = self.table_path(table);
        tokio::fs::create_dir_all(&table_path).await?;

        let version = TableVersion {
            version: versions.len() as u64,
            timestamp: Utc::now(),
            operation,
            partition_by: data.partition_by.clone(),
            metrics,
        };

        // A leftover file with this name belongs to a commit that never reached the log.
        let data_path = self.data_file_path(table, version.version);
        let staging_path = data_path.with_extension("json.tmp");
        tokio::fs::write(&staging_path, serde_json::to_vec(data)?).await?;
        tokio::fs::rename(&staging_path, &data_path).await?;

        medallion_fail_point(LOCAL_STORE_BEFORE_LOG_APPEND)?;

        let mut line = serde_json::to_string(&version)?;
        line.push('\n');
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(table_path.join(LOG_FILE))
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;

        debug!(%table, version = version.version, ?operation, "committed table version");

        Ok(())
    }
}

impl TableStore for LocalTableStore {
    async fn table_exists(&self, table: &TableName) -> MedallionResult<bool> {
        self.exists(table).await
    }

    async fn read_table(&self, table: &TableName) -> MedallionResult<RowSet> {
        let (_, data) = self.load_existing(table).await?;

        Ok(data.rows)
    }

    async fn write_table(
        &self,
        table: &TableName,
        rows: RowSet,
        options: WriteOptions,
    ) -> MedallionResult<OperationMetrics> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let (versions, existing) = if self.exists(table).await? {
            let (versions, data) = self.load_existing(table).await?;
            (versions, Some(data))
        } else {
            (Vec::new(), None)
        };
        let (data, metrics) = apply_write(existing, rows, &options)?;
        self.commit(table, &versions, &data, options.mode.into(), metrics)
            .await?;

        Ok(metrics)
    }

    async fn merge(
        &self,
        table: &TableName,
        source: RowSet,
        spec: MergeSpec,
    ) -> MedallionResult<OperationMetrics> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let (versions, mut data) = self.load_existing(table).await?;
        let (merged, metrics) = apply_merge(data.rows, &source, &spec)?;
        data.rows = merged;
        self.commit(table, &versions, &data, Operation::Merge, metrics)
            .await?;

        Ok(metrics)
    }

    async fn drop_table(&self, table: &TableName) -> MedallionResult<bool> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let table_path = self.table_path(table);
        match tokio::fs::remove_dir_all(&table_path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn history(&self, table: &TableName) -> MedallionResult<Vec<TableVersion>> {
        self.load_versions(table).await
    }

    async fn last_operation_metrics(
        &self,
        table: &TableName,
    ) -> MedallionResult<Option<OperationMetrics>> {
        let versions = self.load_versions(table).await?;

        Ok(versions.last().map(|version| version.metrics))
    }

    async fn table_version(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        let versions = self.load_versions(table).await?;

        Ok(versions.last().map(|version| version.version))
    }

    async fn table_size(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        if !self.exists(table).await? {
            return Ok(None);
        }
        let (_, data) = self.load_existing(table).await?;

        Ok(Some(data.rows.len() as u64))
    }

    async fn optimize(
        &self,
        table: &TableName,
        zorder_by: &[String],
    ) -> MedallionResult<OperationMetrics> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        let (versions, data) = self.load_existing(table).await?;
        let (optimized, metrics) = apply_optimize(data, zorder_by)?;
        self.commit(table, &versions, &optimized, Operation::Optimize, metrics)
            .await?;

        Ok(metrics)
    }

    async fn vacuum(&self, table: &TableName, retention: Duration) -> MedallionResult<u64> {
        let lock = self.table_lock(table);
        let _guard = lock.lock().await;

        if !self.exists(table).await? {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        }
        let versions = self.load_versions(table).await?;
        let Some(latest) = versions.last() else {
            return Ok(0);
        };
        let cutoff = Utc::now() - retention;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(self.table_path(table)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_version) = file_name.to_str().and_then(data_file_version) else {
                continue;
            };

            // A data file stops being needed when the next version replaces it.
            let removable = match file_version.cmp(&latest.version) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => false,
                std::cmp::Ordering::Less => versions
                    .get(file_version as usize + 1)
                    .is_some_and(|next| next.timestamp <= cutoff),
            };
            if removable {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        debug!(%table, removed, "vacuumed table");

        Ok(removed)
    }
}
