//! Ingestion of per-run export files into Bronze tables.
//!
//! Incremental tables keep an append-only history partitioned by `_bronze_load_ts`; snapshot
//! and window tables are overwritten on every run. Every expected failure ends up in the
//! returned [`ProcessingResult`] rather than as an error.

use chrono::{Datelike, NaiveDate};
use medallion_config::shared::{
    LoadMode, Partitioning, TableConfig, TableDefinition, TableDefinitionError,
};
use tracing::{error, info, warn};

use crate::classify::{
    ErrorClass, RECORD_ERROR_LENGTH, classify_error_message, table_definition_message,
    truncate_chars,
};
use crate::columns::{BRONZE_FILENAME, BRONZE_LOAD_TS};
use crate::error::{MedallionError, MedallionResult};
use crate::failpoints::{BRONZE_BEFORE_WRITE, medallion_fail_point};
use crate::source::{LocationResolver, SourceFile, SourceReader};
use crate::store::{OperationMetrics, TableStore, WriteOptions};
use crate::types::{
    BronzeMetrics, Cell, ColumnSchema, ColumnType, LayerMetrics, ProcessingResult,
    ProcessingStatus, ResultTracker, RowSet, RunTimestamp,
};

/// Limit applied to the original error quoted after a successful recovery.
const RECOVERED_ERROR_LENGTH: usize = 300;

/// Loads export files into Bronze tables.
#[derive(Debug, Clone)]
pub struct BronzeLoader<S, R, L> {
    store: S,
    reader: R,
    resolver: L,
}

impl<S, R, L> BronzeLoader<S, R, L>
where
    S: TableStore,
    R: SourceReader,
    L: LocationResolver,
{
    pub fn new(store: S, reader: R, resolver: L) -> Self {
        Self {
            store,
            reader,
            resolver,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads one table's export of run `run_ts` into its Bronze table.
    ///
    /// Only a table without a name is an error. Unsupported load modes are skipped, missing
    /// exports are skipped with zero rows, and read or write failures are reported as failed.
    pub async fn process_bronze_table(
        &self,
        table: &TableConfig,
        source_name: &str,
        run_id: &str,
        run_ts: &RunTimestamp,
        run_date: NaiveDate,
        base_files: &str,
    ) -> MedallionResult<ProcessingResult> {
        let resolved = table.resolve();
        if let Err(TableDefinitionError::MissingName) = resolved {
            return Err(TableDefinitionError::MissingName.into());
        }

        let table_name = table.name.trim();
        let mut tracker =
            ResultTracker::start(None, source_name, table_name, run_id, run_ts, run_date);
        tracker.set_load_mode(table.load_mode_name());

        let definition = match resolved {
            Ok(definition) => definition,
            Err(err) => {
                warn!(table = table_name, error = %err, "skipping bronze load");
                return Ok(tracker.finish(
                    ProcessingStatus::Skipped,
                    bronze_metrics(None),
                    Some(table_definition_message(&err)),
                ));
            }
        };

        let location = self
            .resolver
            .resolve(base_files, source_name, run_ts, &definition.name);
        tracker.set_source_location(location.clone());
        tracker.set_target_table(definition.bronze_table.to_string());

        let files = match self.reader.read_files(&location).await {
            Ok(files) => files,
            Err(err) => {
                let message = err.message();
                if classify_error_message(&message) == ErrorClass::MissingPath {
                    warn!(table = table_name, %location, "no export files found, skipping");
                    return Ok(tracker.finish(
                        ProcessingStatus::Skipped,
                        bronze_metrics(Some(0)),
                        Some(format!("No parquet files found in {location}")),
                    ));
                }

                error!(table = table_name, error = %message, "reading export files failed");
                return Ok(tracker.finish(
                    ProcessingStatus::Failed,
                    bronze_metrics(None),
                    Some(format!(
                        "Read parquet failed: {}",
                        truncate_chars(&message, RECORD_ERROR_LENGTH)
                    )),
                ));
            }
        };

        let (rows, options) = match prepare_rows(&definition, files, run_ts) {
            Ok(prepared) => prepared,
            Err(err) => {
                let message = err.message();
                error!(table = table_name, error = %message, "preparing bronze rows failed");
                return Ok(tracker.finish(
                    ProcessingStatus::Failed,
                    bronze_metrics(None),
                    Some(format!(
                        "Read parquet failed: {}",
                        truncate_chars(&message, RECORD_ERROR_LENGTH)
                    )),
                ));
            }
        };

        let (status, rows_processed, error_message) =
            self.write_with_recovery(&definition, rows, options).await;

        match status {
            ProcessingStatus::Success => {
                info!(table = table_name, rows = ?rows_processed, target = %definition.bronze_table, "bronze load finished")
            }
            ProcessingStatus::Empty => {
                warn!(table = table_name, "export contains no rows")
            }
            _ => {}
        }

        Ok(tracker.finish(status, bronze_metrics(rows_processed), error_message))
    }

    /// Writes the rows, dropping and recreating the table once when it looks corrupt.
    async fn write_with_recovery(
        &self,
        definition: &TableDefinition,
        rows: RowSet,
        options: WriteOptions,
    ) -> (ProcessingStatus, Option<u64>, Option<String>) {
        let table = &definition.bronze_table;

        let first_attempt = match medallion_fail_point(BRONZE_BEFORE_WRITE) {
            Ok(()) => self.store.write_table(table, rows.clone(), options.clone()).await,
            Err(err) => Err(err),
        };

        let err = match first_attempt {
            Ok(metrics) => {
                let rows_processed = self.rows_written(definition, metrics).await;
                if rows_processed == 0 {
                    return (
                        ProcessingStatus::Empty,
                        Some(0),
                        Some("Parquet exists but contains 0 rows".to_string()),
                    );
                }

                return (ProcessingStatus::Success, Some(rows_processed), None);
            }
            Err(err) => err,
        };

        let message = err.message();
        if classify_error_message(&message) != ErrorClass::CorruptStorage {
            error!(table = %table, error = %message, "bronze write failed");
            return (
                ProcessingStatus::Failed,
                None,
                Some(format!(
                    "Write failed: {}",
                    truncate_chars(&message, RECORD_ERROR_LENGTH)
                )),
            );
        }

        warn!(table = %table, error = %message, "bronze table looks corrupt, recreating it");
        match self.recreate(definition, rows, &options).await {
            Ok(metrics) => {
                let rows_processed = self.rows_written(definition, metrics).await;
                (
                    ProcessingStatus::Success,
                    Some(rows_processed),
                    Some(format!(
                        "Initial write failed but table was recreated. Original error: {}",
                        truncate_chars(&message, RECOVERED_ERROR_LENGTH)
                    )),
                )
            }
            Err(recovery_err) => {
                let recovery_message = recovery_err.message();
                error!(table = %table, error = %recovery_message, "bronze table recovery failed");
                (
                    ProcessingStatus::Failed,
                    None,
                    Some(format!(
                        "Write failed: {}; recovery failed: {}",
                        truncate_chars(&message, RECORD_ERROR_LENGTH),
                        truncate_chars(&recovery_message, RECORD_ERROR_LENGTH)
                    )),
                )
            }
        }
    }

    async fn recreate(
        &self,
        definition: &TableDefinition,
        rows: RowSet,
        options: &WriteOptions,
    ) -> Result<OperationMetrics, MedallionError> {
        let table = &definition.bronze_table;
        self.store.drop_table(table).await?;

        let options = WriteOptions::overwrite()
            .with_overwrite_schema(true)
            .with_partition_by(options.partition_by.clone());
        self.store.write_table(table, rows, options).await
    }

    /// Rows written by the latest commit, as reported by the store.
    async fn rows_written(&self, definition: &TableDefinition, fallback: OperationMetrics) -> u64 {
        match self
            .store
            .last_operation_metrics(&definition.bronze_table)
            .await
        {
            Ok(Some(metrics)) => metrics.num_output_rows,
            Ok(None) => fallback.num_output_rows,
            Err(err) => {
                warn!(table = %definition.bronze_table, error = %err, "could not read write metrics");
                fallback.num_output_rows
            }
        }
    }
}

fn bronze_metrics(rows_processed: Option<u64>) -> LayerMetrics {
    LayerMetrics::Bronze(BronzeMetrics { rows_processed })
}

/// Stamps provenance and partition columns onto the export rows and picks the write options.
fn prepare_rows(
    definition: &TableDefinition,
    files: Vec<SourceFile>,
    run_ts: &RunTimestamp,
) -> MedallionResult<(RowSet, WriteOptions)> {
    let mut stamped = Vec::with_capacity(files.len());
    for file in files {
        let mut rows = file.rows.drop_columns(&[BRONZE_LOAD_TS, BRONZE_FILENAME]);
        rows.push_constant_column(
            ColumnSchema::new(BRONZE_FILENAME, ColumnType::String, false),
            Cell::String(file.path),
        )?;
        stamped.push(rows);
    }

    let mut rows = RowSet::concat(stamped);
    rows.push_constant_column(
        ColumnSchema::new(BRONZE_LOAD_TS, ColumnType::String, false),
        Cell::String(run_ts.to_string()),
    )?;

    let options = match &definition.load_mode {
        LoadMode::Incremental { .. } => WriteOptions::append().with_partition_by([BRONZE_LOAD_TS]),
        LoadMode::Snapshot => WriteOptions::overwrite().with_overwrite_schema(true),
        LoadMode::Window { partitioning, .. } => {
            let mut options = WriteOptions::overwrite().with_overwrite_schema(true);
            if let Some(partitioning) = partitioning {
                if add_partition_columns(&mut rows, partitioning, &definition.name)? {
                    options = options.with_partition_by(partitioning.columns());
                }
            }
            options
        }
    };

    Ok((rows, options))
}

/// Derives partition columns. Returns `false` when the source column is absent.
fn add_partition_columns(
    rows: &mut RowSet,
    partitioning: &Partitioning,
    table_name: &str,
) -> MedallionResult<bool> {
    let Partitioning::YearMonth {
        source_column,
        year_column,
        month_column,
    } = partitioning;

    let Some(source_index) = rows.column_index(source_column) else {
        warn!(
            table = table_name,
            column = %source_column,
            "window column missing, writing without year/month partitions"
        );
        return Ok(false);
    };

    let dates: Vec<Option<NaiveDate>> = rows
        .rows()
        .iter()
        .map(|row| row.get(source_index).to_date())
        .collect();

    *rows = rows.drop_columns(&[year_column, month_column]);
    rows.push_column(
        ColumnSchema::new(year_column.clone(), ColumnType::I32, true),
        dates
            .iter()
            .map(|date| date.map(|d| Cell::I32(d.year())).unwrap_or(Cell::Null))
            .collect(),
    )?;
    rows.push_column(
        ColumnSchema::new(month_column.clone(), ColumnType::I32, true),
        dates
            .iter()
            .map(|date| {
                date.map(|d| Cell::I32(d.month() as i32))
                    .unwrap_or(Cell::Null)
            })
            .collect(),
    )?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WriteMode;

    fn file(path: &str, records: Vec<Vec<(&str, Cell)>>) -> SourceFile {
        SourceFile::new(path, RowSet::from_records(records))
    }

    #[test]
    fn provenance_columns_are_added_per_file() {
        let definition = TableConfig::new("orders", "incremental").resolve().unwrap();
        let run_ts = RunTimestamp::parse("20250301T000000000").unwrap();
        let files = vec![
            file("a.parquet", vec![vec![("id", Cell::I64(1))]]),
            file("b.parquet", vec![vec![("id", Cell::I64(2))]]),
        ];

        let (rows, options) = prepare_rows(&definition, files, &run_ts).unwrap();

        assert_eq!(rows.value(0, BRONZE_FILENAME), Some(&Cell::from("a.parquet")));
        assert_eq!(rows.value(1, BRONZE_FILENAME), Some(&Cell::from("b.parquet")));
        assert_eq!(
            rows.value(1, BRONZE_LOAD_TS),
            Some(&Cell::from("20250301T000000000"))
        );
        assert_eq!(options.mode, WriteMode::Append);
        assert_eq!(options.partition_by, vec![BRONZE_LOAD_TS]);
    }

    #[test]
    fn window_tables_derive_year_and_month() {
        let table: TableConfig = serde_json::from_str(
            r#"{"name": "Boekingen", "load_mode": "window", "partitioning": {"type": "year_month"}}"#,
        )
        .unwrap();
        let definition = table.resolve().unwrap();
        let run_ts = RunTimestamp::parse("20250301T000000000").unwrap();
        let files = vec![file(
            "a.parquet",
            vec![
                vec![("Boek_Datum", Cell::from("2024-11-05"))],
                vec![("Boek_Datum", Cell::Null)],
            ],
        )];

        let (rows, options) = prepare_rows(&definition, files, &run_ts).unwrap();

        assert_eq!(rows.value(0, "p_year"), Some(&Cell::I32(2024)));
        assert_eq!(rows.value(0, "p_month"), Some(&Cell::I32(11)));
        assert_eq!(rows.value(1, "p_year"), Some(&Cell::Null));
        assert_eq!(options.partition_by, vec!["p_year", "p_month"]);
        assert!(options.overwrite_schema);
    }

    #[test]
    fn window_tables_without_the_column_are_not_partitioned() {
        let table: TableConfig = serde_json::from_str(
            r#"{"name": "Boekingen", "load_mode": "window", "partitioning": {"type": "year_month"}}"#,
        )
        .unwrap();
        let definition = table.resolve().unwrap();
        let run_ts = RunTimestamp::parse("20250301T000000000").unwrap();
        let files = vec![file("a.parquet", vec![vec![("id", Cell::I64(1))]])];

        let (rows, options) = prepare_rows(&definition, files, &run_ts).unwrap();

        assert!(!rows.has_column("p_year"));
        assert!(options.partition_by.is_empty());
    }
}
