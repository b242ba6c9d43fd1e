use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use medallion_config::shared::TableName;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, MedallionResult};
use crate::store::base::{
    MergeSpec, Operation, OperationMetrics, TableStore, TableVersion, WriteOptions,
};
use crate::store::commit::{TableData, apply_merge, apply_optimize, apply_write};
use crate::types::RowSet;

#[derive(Debug)]
struct MemoryTable {
    data: TableData,
    versions: Vec<TableVersion>,
}

impl MemoryTable {
    fn commit(&mut self, operation: Operation, metrics: OperationMetrics) {
        self.versions.push(TableVersion {
            version: self.versions.len() as u64,
            timestamp: Utc::now(),
            operation,
            partition_by: self.data.partition_by.clone(),
            metrics,
        });
    }
}

#[derive(Debug)]
struct Inner {
    tables: HashMap<TableName, MemoryTable>,
}

/// In-memory table store for tests and local experiments.
///
/// Keeps every table with its full version history. Nothing survives the process.
#[derive(Debug, Clone)]
pub struct MemoryTableStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        let inner = Inner {
            tables: HashMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the names of all tables, sorted.
    pub async fn table_names(&self) -> Vec<TableName> {
        let inner = self.inner.lock().await;
        let mut names: Vec<_> = inner.tables.keys().cloned().collect();
        names.sort();

        names
    }

    /// Replaces a table's rows without committing a version, mostly to seed test state.
    pub async fn seed_table(&self, table: &TableName, rows: RowSet) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            table.clone(),
            MemoryTable {
                data: TableData {
                    rows,
                    partition_by: Vec::new(),
                },
                versions: Vec::new(),
            },
        );
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore for MemoryTableStore {
    async fn table_exists(&self, table: &TableName) -> MedallionResult<bool> {
        let inner = self.inner.lock().await;

        Ok(inner.tables.contains_key(table))
    }

    async fn read_table(&self, table: &TableName) -> MedallionResult<RowSet> {
        let inner = self.inner.lock().await;
        let Some(memory_table) = inner.tables.get(table) else {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        };

        Ok(memory_table.data.rows.clone())
    }

    async fn write_table(
        &self,
        table: &TableName,
        rows: RowSet,
        options: WriteOptions,
    ) -> MedallionResult<OperationMetrics> {
        let mut inner = self.inner.lock().await;
        let existing = inner.tables.get(table).map(|t| t.data.clone());
        let (data, metrics) = apply_write(existing, rows, &options)?;

        let memory_table = inner
            .tables
            .entry(table.clone())
            .or_insert_with(|| MemoryTable {
                data: TableData::default(),
                versions: Vec::new(),
            });
        memory_table.data = data;
        memory_table.commit(options.mode.into(), metrics);

        Ok(metrics)
    }

    async fn merge(
        &self,
        table: &TableName,
        source: RowSet,
        spec: MergeSpec,
    ) -> MedallionResult<OperationMetrics> {
        let mut inner = self.inner.lock().await;
        let Some(memory_table) = inner.tables.get_mut(table) else {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        };

        let target = memory_table.data.rows.clone();
        let (merged, metrics) = apply_merge(target, &source, &spec)?;
        memory_table.data.rows = merged;
        memory_table.commit(Operation::Merge, metrics);

        Ok(metrics)
    }

    async fn drop_table(&self, table: &TableName) -> MedallionResult<bool> {
        let mut inner = self.inner.lock().await;

        Ok(inner.tables.remove(table).is_some())
    }

    async fn history(&self, table: &TableName) -> MedallionResult<Vec<TableVersion>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .map(|t| t.versions.clone())
            .unwrap_or_default())
    }

    async fn last_operation_metrics(
        &self,
        table: &TableName,
    ) -> MedallionResult<Option<OperationMetrics>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .and_then(|t| t.versions.last())
            .map(|version| version.metrics))
    }

    async fn table_version(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .and_then(|t| t.versions.last())
            .map(|version| version.version))
    }

    async fn table_size(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        let inner = self.inner.lock().await;

        Ok(inner.tables.get(table).map(|t| t.data.rows.len() as u64))
    }

    async fn optimize(
        &self,
        table: &TableName,
        zorder_by: &[String],
    ) -> MedallionResult<OperationMetrics> {
        let mut inner = self.inner.lock().await;
        let Some(memory_table) = inner.tables.get_mut(table) else {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        };

        let (data, metrics) = apply_optimize(memory_table.data.clone(), zorder_by)?;
        memory_table.data = data;
        memory_table.commit(Operation::Optimize, metrics);

        Ok(metrics)
    }

    /// Only the latest rows are kept in memory, so there is never anything to remove.
    async fn vacuum(&self, table: &TableName, _retention: Duration) -> MedallionResult<u64> {
        let inner = self.inner.lock().await;
        if !inner.tables.contains_key(table) {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        }

        Ok(0)
    }
}
