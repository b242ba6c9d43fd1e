use std::sync::Arc;

use chrono::Duration;
use medallion_config::shared::TableName;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, MedallionResult};
use crate::medallion_error;
use crate::store::{MergeSpec, OperationMetrics, TableStore, TableVersion, WriteOptions};
use crate::types::RowSet;

/// Fault raised by a [`FaultInjectingTableStore`] operation.
#[derive(Debug, Clone)]
pub enum FaultType {
    /// Fails every call with the given error kind and description.
    Error(ErrorKind, &'static str),
    /// Fails the next call only, then lets calls through.
    ErrorOnce(ErrorKind, &'static str),
    Panic,
}

/// Faults per [`TableStore`] operation. Operations without a fault are delegated unchanged.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub read_table: Option<FaultType>,
    pub write_table: Option<FaultType>,
    pub merge: Option<FaultType>,
    pub drop_table: Option<FaultType>,
}

#[derive(Debug, Clone, Copy)]
enum StoreOperation {
    ReadTable,
    WriteTable,
    Merge,
    DropTable,
}

#[derive(Debug)]
struct Inner {
    config: FaultConfig,
    write_table_calls: u64,
    merge_calls: u64,
}

/// Wraps a [`TableStore`] and fails selected operations.
#[derive(Debug, Clone)]
pub struct FaultInjectingTableStore<S> {
    store: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> FaultInjectingTableStore<S> {
    pub fn wrap(store: S, config: FaultConfig) -> Self {
        let inner = Inner {
            config,
            write_table_calls: 0,
            merge_calls: 0,
        };

        Self {
            store,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn get_inner(&self) -> &S {
        &self.store
    }

    pub async fn write_table_calls(&self) -> u64 {
        self.inner.lock().await.write_table_calls
    }

    pub async fn merge_calls(&self) -> u64 {
        self.inner.lock().await.merge_calls
    }

    async fn trigger(&self, operation: StoreOperation) -> MedallionResult<()> {
        let mut inner = self.inner.lock().await;
        let slot = match operation {
            StoreOperation::ReadTable => &mut inner.config.read_table,
            StoreOperation::WriteTable => {
                inner.write_table_calls += 1;
                &mut inner.config.write_table
            }
            StoreOperation::Merge => {
                inner.merge_calls += 1;
                &mut inner.config.merge
            }
            StoreOperation::DropTable => &mut inner.config.drop_table,
        };

        match slot.clone() {
            None => Ok(()),
            Some(FaultType::Error(kind, description)) => Err(medallion_error!(kind, description)),
            Some(FaultType::ErrorOnce(kind, description)) => {
                *slot = None;
                Err(medallion_error!(kind, description))
            }
            Some(FaultType::Panic) => {
                drop(inner);
                panic!("injected table store panic")
            }
        }
    }
}

impl<S> TableStore for FaultInjectingTableStore<S>
where
    S: TableStore + Send + Sync,
{
    async fn table_exists(&self, table: &TableName) -> MedallionResult<bool> {
        self.store.table_exists(table).await
    }

    async fn read_table(&self, table: &TableName) -> MedallionResult<RowSet> {
        self.trigger(StoreOperation::ReadTable).await?;
        self.store.read_table(table).await
    }

    async fn write_table(
        &self,
        table: &TableName,
        rows: RowSet,
        options: WriteOptions,
    ) -> MedallionResult<OperationMetrics> {
        self.trigger(StoreOperation::WriteTable).await?;
        self.store.write_table(table, rows, options).await
    }

    async fn merge(
        &self,
        table: &TableName,
        source: RowSet,
        spec: MergeSpec,
    ) -> MedallionResult<OperationMetrics> {
        self.trigger(StoreOperation::Merge).await?;
        self.store.merge(table, source, spec).await
    }

    async fn drop_table(&self, table: &TableName) -> MedallionResult<bool> {
        self.trigger(StoreOperation::DropTable).await?;
        self.store.drop_table(table).await
    }

    async fn history(&self, table: &TableName) -> MedallionResult<Vec<TableVersion>> {
        self.store.history(table).await
    }

    async fn last_operation_metrics(
        &self,
        table: &TableName,
    ) -> MedallionResult<Option<OperationMetrics>> {
        self.store.last_operation_metrics(table).await
    }

    async fn table_version(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        self.store.table_version(table).await
    }

    async fn table_size(&self, table: &TableName) -> MedallionResult<Option<u64>> {
        self.store.table_size(table).await
    }

    async fn optimize(
        &self,
        table: &TableName,
        zorder_by: &[String],
    ) -> MedallionResult<OperationMetrics> {
        self.store.optimize(table, zorder_by).await
    }

    async fn vacuum(&self, table: &TableName, retention: Duration) -> MedallionResult<u64> {
        self.store.vacuum(table, retention).await
    }
}
