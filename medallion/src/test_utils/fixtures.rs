//! Builders for tables, export files and wired-up layer components.

use std::sync::Arc;

use medallion_config::shared::TableConfig;

use crate::bronze::BronzeLoader;
use crate::silver::SilverMerger;
use crate::sink::memory::MemoryResultSink;
use crate::source::memory::MemorySourceReader;
use crate::source::{FilesRootResolver, LocationResolver, SourceFile};
use crate::store::TableStore;
use crate::store::memory::MemoryTableStore;
use crate::types::{Cell, RowSet, RunTimestamp};
use crate::workers::LayerPlan;

/// Source name used by the fixtures.
pub const TEST_SOURCE: &str = "vizier";

/// Export root folder used by the fixtures.
pub const TEST_BASE_FILES: &str = "greenhouse_sources";

/// Root under which [`TestPipeline`] resolves export locations.
pub const TEST_FILES_ROOT: &str = "/exports";

pub fn run_ts(raw: &str) -> RunTimestamp {
    RunTimestamp::parse(raw).unwrap()
}

/// Table keyed by `id`.
pub fn keyed_table(name: &str, load_mode: &str) -> TableConfig {
    TableConfig::new(name, load_mode).with_business_keys(["id"])
}

/// Customer rows with `id`, `name` and `balance`, one per id.
///
/// `version` is folded into `name` so that different versions hash differently.
pub fn customer_rows(ids: impl IntoIterator<Item = i64>, version: &str) -> RowSet {
    RowSet::from_records(ids.into_iter().map(|id| {
        vec![
            ("id", Cell::I64(id)),
            ("name", Cell::String(format!("customer-{id}-{version}"))),
            ("balance", Cell::F64(id as f64 * 10.0)),
        ]
    }))
}

/// Bronze, Silver and sink components sharing one in-memory store.
#[derive(Debug, Clone)]
pub struct TestPipeline<S = MemoryTableStore> {
    pub store: S,
    pub reader: MemorySourceReader,
    pub resolver: FilesRootResolver,
    pub sink: MemoryResultSink,
}

impl TestPipeline<MemoryTableStore> {
    pub fn new() -> Self {
        Self::with_store(MemoryTableStore::new())
    }
}

impl Default for TestPipeline<MemoryTableStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> TestPipeline<S>
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            reader: MemorySourceReader::new(),
            resolver: FilesRootResolver::new(TEST_FILES_ROOT),
            sink: MemoryResultSink::new(),
        }
    }

    pub fn bronze_loader(&self) -> BronzeLoader<S, MemorySourceReader, FilesRootResolver> {
        BronzeLoader::new(self.store.clone(), self.reader.clone(), self.resolver.clone())
    }

    pub fn silver_merger(&self) -> SilverMerger<S> {
        SilverMerger::new(self.store.clone())
    }

    pub fn shared_bronze_loader(
        &self,
    ) -> Arc<BronzeLoader<S, MemorySourceReader, FilesRootResolver>> {
        Arc::new(self.bronze_loader())
    }

    pub fn shared_silver_merger(&self) -> Arc<SilverMerger<S>> {
        Arc::new(self.silver_merger())
    }

    /// Location the loader reads `table` from for `run_ts`.
    pub fn export_location(&self, run_ts: &RunTimestamp, table: &str) -> String {
        self.resolver
            .resolve(TEST_BASE_FILES, TEST_SOURCE, run_ts, table)
    }

    /// Publishes `rows` as the single export file of `table` for `run_ts`.
    pub async fn export(&self, run_ts: &RunTimestamp, table: &str, rows: RowSet) {
        let location = self.export_location(run_ts, table);
        let file = SourceFile::new(format!("{location}/part-00000.parquet"), rows);
        self.reader.insert_files(location, vec![file]).await;
    }

    /// Plan over `tables` for `run_ts` with run id `run-{run_ts}`.
    pub fn plan(&self, run_ts: &RunTimestamp, tables: Vec<TableConfig>) -> LayerPlan {
        LayerPlan {
            source: TEST_SOURCE.to_string(),
            run_id: format!("run-{run_ts}"),
            run_ts: run_ts.clone(),
            base_files: TEST_BASE_FILES.to_string(),
            tables,
        }
    }
}
