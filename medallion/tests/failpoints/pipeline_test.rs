use medallion::failpoints::{BRONZE_BEFORE_WRITE, SILVER_AFTER_MERGE};
use medallion::store::TableStore;
use medallion::test_utils::failpoints::CustomFailScenario;
use medallion::test_utils::fixtures::{
    TEST_BASE_FILES, TEST_SOURCE, TestPipeline, customer_rows, keyed_table, run_ts,
};
use medallion::types::{Cell, ProcessingResult, ProcessingStatus, RunTimestamp};
use medallion_config::shared::{TableConfig, TableName};
use medallion_telemetry::tracing::init_test_tracing;

async fn load(pipeline: &TestPipeline, table: &TableConfig, run_ts: &RunTimestamp) -> ProcessingResult {
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

async fn merge(pipeline: &TestPipeline, table: &TableConfig, run_ts: &RunTimestamp) -> ProcessingResult {
    pipeline
        .silver_merger()
        .process_silver_cdc_merge(table, TEST_SOURCE, &format!("run-{run_ts}"), run_ts)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn bronze_write_failure_is_reported_and_retry_loads_once() {
    init_test_tracing();
    let fail_guard = CustomFailScenario::setup(&[(BRONZE_BEFORE_WRITE, "1*return(disk full)")]);
    let pipeline = TestPipeline::new();
    let table = keyed_table("customers", "incremental");
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "customers", customer_rows(1..=4, "v1")).await;

    let failed = load(&pipeline, &table, &ts).await;

    assert_eq!(failed.status, ProcessingStatus::Failed);
    assert_eq!(failed.bronze_metrics().unwrap().rows_processed, None);
    insta::assert_snapshot!(
        failed.error_message.unwrap(),
        @"Write failed: An error occurred in a fail point: The failpoint 'bronze.before_write' returned an error: disk full"
    );
    let bronze_table = TableName::new("bronze", "customers");
    assert!(!pipeline.store.table_exists(&bronze_table).await.unwrap());

    let retried = load(&pipeline, &table, &ts).await;

    assert_eq!(retried.status, ProcessingStatus::Success);
    assert_eq!(retried.bronze_metrics().unwrap().rows_processed, Some(4));
    assert_eq!(pipeline.store.history(&bronze_table).await.unwrap().len(), 1);

    fail_guard.teardown();
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_after_silver_upsert_leaves_a_retryable_table() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let table = keyed_table("customers", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "customers", customer_rows(1..=5, "v1")).await;
    pipeline.export(&second, "customers", customer_rows(4..=6, "v2")).await;

    load(&pipeline, &table, &first).await;
    assert_eq!(merge(&pipeline, &table, &first).await.status, ProcessingStatus::Success);
    load(&pipeline, &table, &second).await;

    let fail_guard = CustomFailScenario::setup(&[(SILVER_AFTER_MERGE, "1*return")]);
    let failed = merge(&pipeline, &table, &second).await;

    assert_eq!(failed.status, ProcessingStatus::Failed);
    assert_eq!(failed.silver_metrics().unwrap().rows_deleted, Some(0));
    assert!(
        failed
            .error_message
            .unwrap()
            .starts_with("An error occurred in a fail point")
    );

    let retried = merge(&pipeline, &table, &second).await;
    fail_guard.teardown();

    assert_eq!(retried.status, ProcessingStatus::Success);
    let metrics = retried.silver_metrics().unwrap();
    assert_eq!(metrics.rows_inserted, Some(0));
    assert_eq!(metrics.rows_updated, Some(0));
    assert_eq!(metrics.rows_deleted, Some(0));
    assert_eq!(metrics.total_silver_rows, Some(6));

    let silver = pipeline
        .store
        .read_table(&TableName::new("silver", "customers"))
        .await
        .unwrap();
    let names: Vec<_> = (0..silver.len())
        .filter(|&index| silver.value(index, "id") == Some(&Cell::I64(5)))
        .map(|index| silver.value(index, "name").cloned())
        .collect();
    assert_eq!(names, vec![Some(Cell::from("customer-5-v2"))]);
}
