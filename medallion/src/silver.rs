//! CDC merge of Bronze current state into Silver tables.
//!
//! Silver keeps exactly one row per business key. Changed rows are detected through the row
//! hash, new keys are inserted, and for incremental tables keys that vanished from Bronze are
//! soft-deleted. Re-running a merge for the same run timestamp changes nothing.

use std::collections::{HashMap, HashSet};

use medallion_config::shared::{TableConfig, TableDefinition, TableDefinitionError};
use tracing::{debug, error, info, warn};

use crate::cdc::{compare_row_hashes, detect_deletes};
use crate::classify::{RECORD_ERROR_LENGTH, table_definition_message, truncate_chars};
use crate::columns::{IS_DELETED, SILVER_DELETED_TS, SILVER_INSERTED_TS, SILVER_UPDATED_TS};
use crate::error::MedallionResult;
use crate::failpoints::{SILVER_AFTER_MERGE, medallion_fail_point};
use crate::hashing::{DEFAULT_HASH_COLUMN, HashAlgorithm, add_row_hash, business_columns};
use crate::history::reconstruct_bronze_current_state;
use crate::store::{MatchCondition, MatchedAction, MergeSpec, TableStore, WriteOptions};
use crate::types::{
    BusinessKey, Cell, ColumnSchema, ColumnType, KeyExtractor, LayerMetrics, ProcessingResult,
    ProcessingStatus, ResultTracker, RowSet, RunTimestamp, SilverMetrics,
};

const SILVER_TAG: &str = "silver";

/// Merges Bronze tables into their Silver counterparts.
#[derive(Debug, Clone)]
pub struct SilverMerger<S> {
    store: S,
}

impl<S> SilverMerger<S>
where
    S: TableStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merges the Bronze state of `table` as of `run_ts` into Silver.
    ///
    /// Only a table without a name is an error. Tables without business keys are skipped and
    /// any failure while merging is reported in the returned record.
    pub async fn process_silver_cdc_merge(
        &self,
        table: &TableConfig,
        source_name: &str,
        run_id: &str,
        run_ts: &RunTimestamp,
    ) -> MedallionResult<ProcessingResult> {
        let resolved = table.resolve();
        if let Err(TableDefinitionError::MissingName) = resolved {
            return Err(TableDefinitionError::MissingName.into());
        }

        let table_name = table.name.trim();
        let mut tracker = ResultTracker::start(
            Some(SILVER_TAG),
            source_name,
            table_name,
            run_id,
            run_ts,
            run_ts.run_date(),
        );
        tracker.set_load_mode(table.load_mode_name());

        let definition = match resolved {
            Ok(definition) => definition,
            Err(err) => {
                warn!(table = table_name, error = %err, "skipping silver merge");
                return Ok(tracker.finish(
                    ProcessingStatus::Skipped,
                    LayerMetrics::Silver(SilverMetrics::default()),
                    Some(table_definition_message(&err)),
                ));
            }
        };

        if definition.business_keys.is_empty() {
            warn!(table = table_name, "no business keys defined, skipping silver merge");
            return Ok(tracker.finish(
                ProcessingStatus::Skipped,
                LayerMetrics::Silver(SilverMetrics::default()),
                Some("Business keys not defined in table config".to_string()),
            ));
        }

        if let Err(err) = definition.validate_business_keys() {
            warn!(table = table_name, error = %err, "invalid business keys, skipping silver merge");
            return Ok(tracker.finish(
                ProcessingStatus::Skipped,
                LayerMetrics::Silver(SilverMetrics::default()),
                Some(table_definition_message(&err)),
            ));
        }

        tracker.set_source_location(definition.bronze_table.to_string());
        tracker.set_target_table(definition.silver_table.to_string());

        match self.merge_table(&definition, run_ts).await {
            Ok(metrics) => {
                info!(
                    table = table_name,
                    inserted = ?metrics.rows_inserted,
                    updated = ?metrics.rows_updated,
                    deleted = ?metrics.rows_deleted,
                    total = ?metrics.total_silver_rows,
                    "silver merge finished"
                );
                Ok(tracker.finish(
                    ProcessingStatus::Success,
                    LayerMetrics::Silver(metrics),
                    None,
                ))
            }
            Err(err) => {
                let message = err.message();
                error!(table = table_name, error = %message, "silver merge failed");
                Ok(tracker.finish(
                    ProcessingStatus::Failed,
                    LayerMetrics::Silver(SilverMetrics {
                        rows_deleted: Some(0),
                        ..Default::default()
                    }),
                    Some(truncate_chars(&message, RECORD_ERROR_LENGTH).to_string()),
                ))
            }
        }
    }

    async fn merge_table(
        &self,
        definition: &TableDefinition,
        run_ts: &RunTimestamp,
    ) -> MedallionResult<SilverMetrics> {
        let keys = &definition.business_keys;
        let silver_table = &definition.silver_table;

        let bronze = self.store.read_table(&definition.bronze_table).await?;
        let current = if definition.load_mode.is_incremental() {
            reconstruct_bronze_current_state(&bronze, keys, Some(run_ts.as_str()))?
        } else {
            bronze
        };
        let bronze_rows = current.len() as u64;

        let hash_columns = business_columns(&current);
        let hashed = add_row_hash(
            current,
            DEFAULT_HASH_COLUMN,
            Some(hash_columns.as_slice()),
            None,
            HashAlgorithm::Sha256,
        )?;
        hashed.require_columns(keys)?;
        let staged = with_silver_columns(hashed, run_ts)?;

        if !self.store.table_exists(silver_table).await? {
            debug!(table = %silver_table, rows = bronze_rows, "creating silver table");
            self.store
                .write_table(
                    silver_table,
                    staged,
                    WriteOptions::overwrite().with_overwrite_schema(true),
                )
                .await?;

            return Ok(SilverMetrics {
                rows_inserted: Some(bronze_rows),
                rows_updated: Some(0),
                rows_deleted: Some(0),
                rows_unchanged: Some(0),
                total_silver_rows: Some(bronze_rows),
                bronze_rows: Some(bronze_rows),
            });
        }

        let silver = self.store.read_table(silver_table).await?;
        let counts = classify_changes(&staged, &silver, keys)?;

        let upsert = MergeSpec::new(keys.iter().cloned())
            .when_matched(
                MatchCondition::Any(vec![
                    MatchCondition::ColumnDiffers(DEFAULT_HASH_COLUMN.to_string()),
                    MatchCondition::TargetEquals(IS_DELETED.to_string(), Cell::Bool(true)),
                ]),
                MatchedAction::UpdateAll {
                    preserve: vec![SILVER_INSERTED_TS.to_string()],
                },
            )
            .insert_unmatched();
        let merge_metrics = self.store.merge(silver_table, staged.clone(), upsert).await?;

        if merge_metrics.num_inserted_rows != counts.inserted
            || merge_metrics.num_updated_rows != counts.updated
        {
            warn!(
                table = %silver_table,
                classified_inserts = counts.inserted,
                classified_updates = counts.updated,
                merged_inserts = merge_metrics.num_inserted_rows,
                merged_updates = merge_metrics.num_updated_rows,
                "merge counts differ from the classification pass"
            );
        }

        medallion_fail_point(SILVER_AFTER_MERGE)?;

        let mut rows_deleted = 0;
        if definition.load_mode.is_incremental() {
            let merged = self.store.read_table(silver_table).await?;
            let deleted: HashSet<BusinessKey> =
                detect_deletes(&staged, &merged, keys)?.into_iter().collect();

            if !deleted.is_empty() {
                let deleted_keys = merged
                    .select(keys)?
                    .filter(|row| deleted.contains(&BusinessKey::new(row.values().to_vec())));
                rows_deleted = deleted_keys.len() as u64;

                let soft_delete = MergeSpec::new(keys.iter().cloned()).when_matched(
                    MatchCondition::Always,
                    MatchedAction::Assign(vec![
                        (IS_DELETED.to_string(), Cell::Bool(true)),
                        (SILVER_DELETED_TS.to_string(), Cell::String(run_ts.to_string())),
                    ]),
                );
                self.store
                    .merge(silver_table, deleted_keys, soft_delete)
                    .await?;
                debug!(table = %silver_table, rows = rows_deleted, "soft-deleted vanished keys");
            }
        }

        let total_silver_rows = match self.store.last_operation_metrics(silver_table).await? {
            Some(metrics) => metrics.num_table_rows,
            None => self.store.read_table(silver_table).await?.len() as u64,
        };

        Ok(SilverMetrics {
            rows_inserted: Some(counts.inserted),
            rows_updated: Some(counts.updated),
            rows_deleted: Some(rows_deleted),
            rows_unchanged: Some(counts.unchanged),
            total_silver_rows: Some(total_silver_rows),
            bronze_rows: Some(bronze_rows),
        })
    }
}

/// Exact outcome of a merge, computed before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChangeCounts {
    inserted: u64,
    updated: u64,
    unchanged: u64,
}

/// Counts inserts, updates and unchanged keys, treating a returning soft-deleted key as updated.
fn classify_changes(
    staged: &RowSet,
    silver: &RowSet,
    keys: &[String],
) -> MedallionResult<ChangeCounts> {
    let changes = compare_row_hashes(staged, silver, keys, DEFAULT_HASH_COLUMN)?;

    let silver_keys = KeyExtractor::new(silver, keys)?;
    let deleted_flags: HashMap<BusinessKey, bool> = match silver.column_index(IS_DELETED) {
        Some(index) => silver
            .rows()
            .iter()
            .map(|row| (silver_keys.key(row), row.get(index).as_bool() == Some(true)))
            .collect(),
        None => HashMap::new(),
    };

    let reactivated = changes
        .unchanged
        .iter()
        .filter(|key| deleted_flags.get(*key).copied().unwrap_or(false))
        .count() as u64;

    Ok(ChangeCounts {
        inserted: changes.inserts.len() as u64,
        updated: changes.updates.len() as u64 + reactivated,
        unchanged: changes.unchanged.len() as u64 - reactivated,
    })
}

/// Adds the Silver bookkeeping columns for a row first seen at `run_ts`.
fn with_silver_columns(mut rows: RowSet, run_ts: &RunTimestamp) -> MedallionResult<RowSet> {
    rows = rows.drop_columns(&[
        SILVER_INSERTED_TS,
        SILVER_UPDATED_TS,
        SILVER_DELETED_TS,
        IS_DELETED,
    ]);

    let run_ts = Cell::String(run_ts.to_string());
    rows.push_constant_column(
        ColumnSchema::new(SILVER_INSERTED_TS, ColumnType::String, false),
        run_ts.clone(),
    )?;
    rows.push_constant_column(
        ColumnSchema::new(SILVER_UPDATED_TS, ColumnType::String, false),
        run_ts,
    )?;
    rows.push_constant_column(
        ColumnSchema::new(SILVER_DELETED_TS, ColumnType::String, true),
        Cell::Null,
    )?;
    rows.push_constant_column(
        ColumnSchema::new(IS_DELETED, ColumnType::Bool, false),
        Cell::Bool(false),
    )?;

    Ok(rows)
}
