use medallion::columns::{BRONZE_FILENAME, BRONZE_LOAD_TS};
use medallion::error::ErrorKind;
use medallion::store::memory::MemoryTableStore;
use medallion::store::{Operation, TableStore};
use medallion::test_utils::fault_store::{FaultConfig, FaultInjectingTableStore, FaultType};
use medallion::test_utils::fixtures::{
    TEST_BASE_FILES, TEST_SOURCE, TestPipeline, customer_rows, keyed_table, run_ts,
};
use medallion::types::{Cell, ProcessingResult, ProcessingStatus, RowSet, RunTimestamp};
use medallion_config::shared::{TableConfig, TableName};
use medallion_telemetry::tracing::init_test_tracing;

async fn load<S>(
    pipeline: &TestPipeline<S>,
    table: &TableConfig,
    run_ts: &RunTimestamp,
) -> ProcessingResult
where
    S: TableStore + Clone + Send + Sync + 'static,
{
    pipeline
        .bronze_loader()
        .process_bronze_table(
            table,
            TEST_SOURCE,
            &format!("run-{run_ts}"),
            run_ts,
            run_ts.run_date(),
            TEST_BASE_FILES,
        )
        .await
        .unwrap()
}

fn rows_processed(result: &ProcessingResult) -> Option<u64> {
    result.bronze_metrics().and_then(|metrics| metrics.rows_processed)
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_loads_append_partitioned_history() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("orders", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");

    pipeline.export(&first, "orders", customer_rows(1..=3, "v1")).await;
    pipeline.export(&second, "orders", customer_rows(2..=3, "v2")).await;

    let first_result = load(&pipeline, &table, &first).await;
    let second_result = load(&pipeline, &table, &second).await;

    assert_eq!(first_result.status, ProcessingStatus::Success);
    assert_eq!(rows_processed(&first_result), Some(3));
    assert_eq!(second_result.status, ProcessingStatus::Success);
    assert_eq!(rows_processed(&second_result), Some(2));
    assert_eq!(second_result.target_table.as_deref(), Some("bronze.orders"));
    assert!(second_result.log_id.starts_with("vizier:orders:20250302T060000000:"));

    let bronze_table = TableName::new("bronze", "orders");
    let bronze = pipeline.store.read_table(&bronze_table).await.unwrap();
    assert_eq!(bronze.len(), 5);
    assert_eq!(bronze.value(0, BRONZE_LOAD_TS), Some(&Cell::from("20250301T060000000")));
    assert_eq!(bronze.value(4, BRONZE_LOAD_TS), Some(&Cell::from("20250302T060000000")));
    assert_eq!(
        bronze.value(0, BRONZE_FILENAME),
        Some(&Cell::from(
            "/exports/greenhouse_sources/vizier/2025/03/01/20250301T060000000/orders/part-00000.parquet"
        ))
    );

    let history = pipeline.store.history(&bronze_table).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|version| version.operation == Operation::Append));
    assert_eq!(history[1].partition_by, vec![BRONZE_LOAD_TS.to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_loads_replace_the_table() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("customers", "snapshot");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");

    pipeline.export(&first, "customers", customer_rows(1..=4, "v1")).await;
    pipeline.export(&second, "customers", customer_rows(1..=2, "v2")).await;

    load(&pipeline, &table, &first).await;
    let result = load(&pipeline, &table, &second).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(rows_processed(&result), Some(2));

    let bronze = pipeline
        .store
        .read_table(&TableName::new("bronze", "customers"))
        .await
        .unwrap();
    assert_eq!(bronze.len(), 2);
    assert_eq!(bronze.value(1, "name"), Some(&Cell::from("customer-2-v2")));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_export_is_skipped_with_zero_rows() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");

    let result = load(&pipeline, &keyed_table("orders", "incremental"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(rows_processed(&result), Some(0));
    insta::assert_snapshot!(
        result.error_message.unwrap(),
        @"No parquet files found in /exports/greenhouse_sources/vizier/2025/03/01/20250301T060000000/orders"
    );
    assert!(
        !pipeline
            .store
            .table_exists(&TableName::new("bronze", "orders"))
            .await
            .unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_export_is_reported_as_empty() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline
        .export(&ts, "customers", RowSet::from_records(Vec::<Vec<(&str, Cell)>>::new()))
        .await;

    let result = load(&pipeline, &keyed_table("customers", "snapshot"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Empty);
    assert_eq!(rows_processed(&result), Some(0));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Parquet exists but contains 0 rows")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_load_mode_is_skipped() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=3, "v1")).await;

    let result = load(&pipeline, &TableConfig::new("orders", "cdc_stream"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(rows_processed(&result), None);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Unsupported load_mode 'cdc_stream'")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_target_table_is_skipped_with_its_own_message() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=3, "v1")).await;
    let mut table = keyed_table("orders", "incremental");
    table.delta_table = Some("landing.".to_string());

    let result = load(&pipeline, &table, &ts).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Invalid delta_table 'landing.', expected 'schema.table'")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn table_without_name_is_an_error() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");

    let err = pipeline
        .bronze_loader()
        .process_bronze_table(
            &TableConfig::new("  ", "snapshot"),
            TEST_SOURCE,
            "run",
            &ts,
            ts.run_date(),
            TEST_BASE_FILES,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidTableDefinition);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_table_is_recreated_once() {
    init_test_tracing();
    let store = FaultInjectingTableStore::wrap(
        MemoryTableStore::new(),
        FaultConfig {
            write_table: Some(FaultType::ErrorOnce(
                ErrorKind::CorruptTable,
                "Unreadable table metadata",
            )),
            ..Default::default()
        },
    );
    let pipeline = TestPipeline::with_store(store.clone());
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=3, "v1")).await;

    let result = load(&pipeline, &keyed_table("orders", "incremental"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(rows_processed(&result), Some(3));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Initial write failed but table was recreated. Original error: Unreadable table metadata")
    );
    assert_eq!(store.write_table_calls().await, 2);

    let bronze_table = TableName::new("bronze", "orders");
    let history = store.history(&bronze_table).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, Operation::Overwrite);
    assert_eq!(history[0].partition_by, vec![BRONZE_LOAD_TS.to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_recovery_reports_both_errors() {
    init_test_tracing();
    let store = FaultInjectingTableStore::wrap(
        MemoryTableStore::new(),
        FaultConfig {
            write_table: Some(FaultType::ErrorOnce(
                ErrorKind::CorruptTable,
                "Unreadable table metadata",
            )),
            drop_table: Some(FaultType::Error(
                ErrorKind::StorageIoError,
                "Permission denied while dropping",
            )),
            ..Default::default()
        },
    );
    let pipeline = TestPipeline::with_store(store.clone());
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=3, "v1")).await;

    let result = load(&pipeline, &keyed_table("orders", "incremental"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Failed);
    assert_eq!(rows_processed(&result), None);
    insta::assert_snapshot!(
        result.error_message.unwrap(),
        @"Write failed: Unreadable table metadata; recovery failed: Permission denied while dropping"
    );
    assert_eq!(store.write_table_calls().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn other_write_errors_are_not_recovered() {
    init_test_tracing();
    let store = FaultInjectingTableStore::wrap(
        MemoryTableStore::new(),
        FaultConfig {
            write_table: Some(FaultType::ErrorOnce(
                ErrorKind::StorageIoError,
                "Disk quota exceeded",
            )),
            ..Default::default()
        },
    );
    let pipeline = TestPipeline::with_store(store.clone());
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "orders", customer_rows(1..=3, "v1")).await;

    let result = load(&pipeline, &keyed_table("orders", "incremental"), &ts).await;

    assert_eq!(result.status, ProcessingStatus::Failed);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Write failed: Disk quota exceeded")
    );
    assert_eq!(store.write_table_calls().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn window_loads_add_year_month_partitions() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table: TableConfig = serde_json::from_str(
        r#"{"name": "Boekingen", "load_mode": "window", "partitioning": {"type": "year_month"}}"#,
    )
    .unwrap();
    let ts = run_ts("20250301T060000000");
    pipeline
        .export(
            &ts,
            "Boekingen",
            RowSet::from_records(vec![
                vec![("id", Cell::I64(1)), ("Boek_Datum", Cell::from("2024-12-31"))],
                vec![("id", Cell::I64(2)), ("Boek_Datum", Cell::from("2025-01-15"))],
            ]),
        )
        .await;

    let result = load(&pipeline, &table, &ts).await;

    assert_eq!(result.status, ProcessingStatus::Success);
    let bronze_table = TableName::new("bronze", "Boekingen");
    let bronze = pipeline.store.read_table(&bronze_table).await.unwrap();
    assert_eq!(bronze.value(0, "p_year"), Some(&Cell::I32(2024)));
    assert_eq!(bronze.value(1, "p_month"), Some(&Cell::I32(1)));

    let history = pipeline.store.history(&bronze_table).await.unwrap();
    assert_eq!(
        history[0].partition_by,
        vec!["p_year".to_string(), "p_month".to_string()]
    );
}
