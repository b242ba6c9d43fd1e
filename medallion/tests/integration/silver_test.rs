use std::collections::HashMap;

use medallion::columns::{IS_DELETED, SILVER_DELETED_TS, SILVER_INSERTED_TS, SILVER_UPDATED_TS};
use medallion::error::ErrorKind;
use medallion::hashing::DEFAULT_HASH_COLUMN;
use medallion::store::TableStore;
use medallion::store::memory::MemoryTableStore;
use medallion::test_utils::fault_store::{FaultConfig, FaultInjectingTableStore, FaultType};
use medallion::test_utils::fixtures::{
    TEST_BASE_FILES, TEST_SOURCE, TestPipeline, customer_rows, keyed_table, run_ts,
};
use medallion::types::{Cell, ProcessingResult, ProcessingStatus, RowSet, RunTimestamp, SilverMetrics};
use medallion_config::shared::{TableConfig, TableName};
use medallion_telemetry::tracing::init_test_tracing;

/// Loads the export of `run_ts` into Bronze, then merges Bronze into Silver.
async fn run<S>(
    pipeline: &TestPipeline<S>,
    table: &TableConfig,
    run_ts: &RunTimestamp,
) -> ProcessingResult
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    let run_id = format!("run-{run_ts}");
    let bronze = pipeline
        .bronze_loader()
        .process_bronze_table(
            table,
            TEST_SOURCE,
            &run_id,
            run_ts,
            run_ts.run_date(),
            TEST_BASE_FILES,
        )
        .await
        .unwrap();
    assert_eq!(bronze.status, ProcessingStatus::Success);

    merge(pipeline, table, run_ts).await
}

async fn merge<S>(
    pipeline: &TestPipeline<S>,
    table: &TableConfig,
    run_ts: &RunTimestamp,
) -> ProcessingResult
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    pipeline
        .silver_merger()
        .process_silver_cdc_merge(table, TEST_SOURCE, &format!("run-{run_ts}"), run_ts)
        .await
        .unwrap()
}

fn metrics(result: &ProcessingResult) -> SilverMetrics {
    *result.silver_metrics().unwrap()
}

fn counts(inserted: u64, updated: u64, deleted: u64, unchanged: u64, total: u64, bronze: u64) -> SilverMetrics {
    SilverMetrics {
        rows_inserted: Some(inserted),
        rows_updated: Some(updated),
        rows_deleted: Some(deleted),
        rows_unchanged: Some(unchanged),
        total_silver_rows: Some(total),
        bronze_rows: Some(bronze),
    }
}

fn row_by_id(rows: &RowSet, id: i64) -> HashMap<String, Cell> {
    rows.to_records()
        .into_iter()
        .find(|record| record.get("id") == Some(&Cell::I64(id)))
        .unwrap()
}

fn render_lifecycle(rows: &RowSet, ids: impl IntoIterator<Item = i64>) -> String {
    let text = |cell: &Cell| cell.to_text().unwrap_or_else(|| "-".to_string());

    ids.into_iter()
        .map(|id| {
            let row = row_by_id(rows, id);
            let state = if row[IS_DELETED] == Cell::Bool(true) {
                "deleted"
            } else {
                "active"
            };
            format!(
                "{id} {state} inserted={} updated={} deleted={}",
                text(&row[SILVER_INSERTED_TS]),
                text(&row[SILVER_UPDATED_TS]),
                text(&row[SILVER_DELETED_TS]),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn silver_table(name: &str) -> TableName {
    TableName::new("silver", name)
}

#[tokio::test(flavor = "multi_thread")]
async fn first_merge_bootstraps_the_silver_table() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=100, "v1")).await;

    let result = run(&pipeline, &table, &ts).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(metrics(&result), counts(100, 0, 0, 0, 100, 100));
    assert!(
        result
            .log_id
            .starts_with("vizier:orders:20250301T060000000:silver:")
    );
    assert_eq!(result.target_table.as_deref(), Some("silver.orders"));

    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    assert_eq!(silver.len(), 100);
    for record in silver.to_records() {
        assert_eq!(record[IS_DELETED], Cell::Bool(false));
        assert_eq!(record[SILVER_INSERTED_TS], Cell::from("20250301T060000000"));
        assert_eq!(record[SILVER_UPDATED_TS], Cell::from("20250301T060000000"));
        assert_eq!(record[SILVER_DELETED_TS], Cell::Null);
        assert_eq!(record[DEFAULT_HASH_COLUMN].as_str().map(str::len), Some(64));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_merge_of_the_same_run_changes_nothing() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=100, "v1")).await;
    run(&pipeline, &table, &ts).await;
    let before = pipeline.store.read_table(&silver_table("orders")).await.unwrap();

    let result = merge(&pipeline, &table, &ts).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(metrics(&result), counts(0, 0, 0, 100, 100, 100));
    let after = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread")]
async fn changed_rows_are_updated_and_new_keys_inserted() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "orders", customer_rows(1..=100, "v1")).await;
    pipeline
        .export(
            &second,
            "orders",
            RowSet::concat(vec![
                customer_rows(1..=3, "v2"),
                customer_rows(101..=102, "v1"),
            ]),
        )
        .await;
    run(&pipeline, &table, &first).await;

    let result = run(&pipeline, &table, &second).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(metrics(&result), counts(2, 3, 0, 97, 102, 102));

    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    let updated = row_by_id(&silver, 1);
    assert_eq!(updated["name"], Cell::from("customer-1-v2"));
    assert_eq!(updated[SILVER_INSERTED_TS], Cell::from("20250301T060000000"));
    assert_eq!(updated[SILVER_UPDATED_TS], Cell::from("20250302T060000000"));

    let untouched = row_by_id(&silver, 50);
    assert_eq!(untouched[SILVER_UPDATED_TS], Cell::from("20250301T060000000"));

    let inserted = row_by_id(&silver, 101);
    assert_eq!(inserted[SILVER_INSERTED_TS], Cell::from("20250302T060000000"));
}

#[tokio::test(flavor = "multi_thread")]
async fn vanished_keys_are_soft_deleted_and_reactivated() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let bronze_table = TableName::new("bronze", "orders");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    let third = run_ts("20250303T060000000");

    pipeline.export(&first, "orders", customer_rows(1..=10, "v1")).await;
    run(&pipeline, &table, &first).await;

    // Bronze history is rebuilt from the second run onwards, which no longer carries key 5.
    pipeline.store.drop_table(&bronze_table).await.unwrap();
    pipeline
        .export(
            &second,
            "orders",
            customer_rows((1..=10).filter(|id| *id != 5), "v1"),
        )
        .await;
    let deleted = run(&pipeline, &table, &second).await;

    assert_eq!(deleted.status, ProcessingStatus::Success);
    assert_eq!(metrics(&deleted), counts(0, 0, 1, 9, 10, 9));
    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    assert_eq!(row_by_id(&silver, 5)["name"], Cell::from("customer-5-v1"));
    insta::assert_snapshot!(render_lifecycle(&silver, 4..=6), @r"
    4 active inserted=20250301T060000000 updated=20250301T060000000 deleted=-
    5 deleted inserted=20250301T060000000 updated=20250301T060000000 deleted=20250302T060000000
    6 active inserted=20250301T060000000 updated=20250301T060000000 deleted=-
    ");

    pipeline.export(&third, "orders", customer_rows([5], "v1")).await;
    let reactivated = run(&pipeline, &table, &third).await;

    assert_eq!(metrics(&reactivated), counts(0, 1, 0, 9, 10, 10));
    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    insta::assert_snapshot!(render_lifecycle(&silver, [5]), @"5 active inserted=20250301T060000000 updated=20250303T060000000 deleted=-");
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_only_sees_bronze_loads_up_to_its_run() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "orders", customer_rows(1..=3, "v1")).await;
    pipeline.export(&second, "orders", customer_rows(2..=4, "v2")).await;
    for ts in [&first, &second] {
        let loaded = pipeline
            .bronze_loader()
            .process_bronze_table(
                &table,
                TEST_SOURCE,
                &format!("run-{ts}"),
                ts,
                ts.run_date(),
                TEST_BASE_FILES,
            )
            .await
            .unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Success);
    }

    let behind = merge(&pipeline, &table, &first).await;

    assert_eq!(metrics(&behind), counts(3, 0, 0, 0, 3, 3));
    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    assert_eq!(silver.len(), 3);
    assert_eq!(row_by_id(&silver, 2)["name"], Cell::from("customer-2-v1"));
    assert!(
        silver
            .column_values("id")
            .unwrap()
            .all(|id| *id != Cell::I64(4))
    );

    let caught_up = merge(&pipeline, &table, &second).await;

    assert_eq!(metrics(&caught_up), counts(1, 2, 0, 1, 4, 4));
    let silver = pipeline.store.read_table(&silver_table("orders")).await.unwrap();
    assert_eq!(row_by_id(&silver, 2)["name"], Cell::from("customer-2-v2"));
    assert_eq!(row_by_id(&silver, 4)[SILVER_INSERTED_TS], Cell::from("20250302T060000000"));
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_tables_never_soft_delete() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("customers", "snapshot");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "customers", customer_rows(1..=5, "v1")).await;
    pipeline.export(&second, "customers", customer_rows(1..=4, "v1")).await;
    run(&pipeline, &table, &first).await;

    let result = run(&pipeline, &table, &second).await;

    assert_eq!(metrics(&result), counts(0, 0, 0, 4, 5, 4));
    let silver = pipeline
        .store
        .read_table(&silver_table("customers"))
        .await
        .unwrap();
    assert_eq!(row_by_id(&silver, 5)[IS_DELETED], Cell::Bool(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn tables_without_business_keys_are_skipped() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");

    let result = merge(&pipeline, &TableConfig::new("orders", "snapshot"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(metrics(&result), SilverMetrics::default());
    assert_eq!(
        result.error_message.as_deref(),
        Some("Business keys not defined in table config")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_business_keys_are_skipped_with_their_own_message() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    let table = TableConfig::new("orders", "snapshot").with_business_keys(["id", "id"]);

    let result = merge(&pipeline, &table, &ts).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Invalid business_keys: 'id' is listed more than once")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_bronze_table_fails_the_merge() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");

    let result = merge(&pipeline, &keyed_table("orders", "incremental"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Failed);
    assert_eq!(
        metrics(&result),
        SilverMetrics {
            rows_deleted: Some(0),
            ..Default::default()
        }
    );
    assert!(
        result
            .error_message
            .unwrap()
            .starts_with("Table does not exist")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_merge_can_be_retried() {
    init_test_tracing();
    let store = FaultInjectingTableStore::wrap(
        MemoryTableStore::new(),
        FaultConfig {
            merge: Some(FaultType::ErrorOnce(
                ErrorKind::MergeFailed,
                "Concurrent modification of the silver table",
            )),
            ..Default::default()
        },
    );
    let pipeline = TestPipeline::with_store(store.clone());
    let table = keyed_table("orders", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "orders", customer_rows(1..=10, "v1")).await;
    pipeline.export(&second, "orders", customer_rows(1..=2, "v2")).await;
    run(&pipeline, &table, &first).await;

    let failed = run(&pipeline, &table, &second).await;

    assert_eq!(failed.status, ProcessingStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Concurrent modification of the silver table")
    );

    let retried = merge(&pipeline, &table, &second).await;

    assert_eq!(retried.status, ProcessingStatus::Success);
    assert_eq!(metrics(&retried), counts(0, 2, 0, 8, 10, 10));
    assert_eq!(store.merge_calls().await, 2);
}
