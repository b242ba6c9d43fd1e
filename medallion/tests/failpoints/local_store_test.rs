use medallion::failpoints::LOCAL_STORE_BEFORE_LOG_APPEND;
use medallion::store::TableStore;
use medallion::store::local::LocalTableStore;
use medallion::test_utils::failpoints::CustomFailScenario;
use medallion::test_utils::fixtures::{
    TEST_BASE_FILES, TEST_SOURCE, TestPipeline, customer_rows, keyed_table, run_ts,
};
use medallion::types::{ProcessingResult, ProcessingStatus, RunTimestamp};
use medallion_config::shared::{TableConfig, TableName};
use medallion_telemetry::tracing::init_test_tracing;

async fn load(
    pipeline: &TestPipeline<LocalTableStore>,
    table: &TableConfig,
    run_ts: &RunTimestamp,
) -> ProcessingResult {
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

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_commit_leaves_the_previous_version_in_place() {
    init_test_tracing();
    let warehouse = tempfile::tempdir().unwrap();
    let store = LocalTableStore::new(warehouse.path());
    let pipeline = TestPipeline::with_store(store.clone());
    let table = keyed_table("customers", "incremental");
    let bronze_table = TableName::new("bronze", "customers");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline.export(&first, "customers", customer_rows(1..=4, "v1")).await;
    pipeline.export(&second, "customers", customer_rows(5..=6, "v1")).await;

    assert_eq!(load(&pipeline, &table, &first).await.status, ProcessingStatus::Success);
    let rows_before = store.read_table(&bronze_table).await.unwrap();
    let metrics_before = store.last_operation_metrics(&bronze_table).await.unwrap();

    let fail_guard =
        CustomFailScenario::setup(&[(LOCAL_STORE_BEFORE_LOG_APPEND, "1*return(log volume full)")]);
    let failed = load(&pipeline, &table, &second).await;

    assert_eq!(failed.status, ProcessingStatus::Failed);
    insta::assert_snapshot!(
        failed.error_message.unwrap(),
        @"Write failed: An error occurred in a fail point: The failpoint 'local_store.before_log_append' returned an error: log volume full"
    );
    // The data file of version 1 exists, but nothing refers to it.
    assert!(store.data_file_path(&bronze_table, 1).is_file());
    assert_eq!(store.history(&bronze_table).await.unwrap().len(), 1);
    assert_eq!(store.table_version(&bronze_table).await.unwrap(), Some(0));
    assert_eq!(
        store.last_operation_metrics(&bronze_table).await.unwrap(),
        metrics_before
    );
    assert_eq!(store.read_table(&bronze_table).await.unwrap(), rows_before);

    let retried = load(&pipeline, &table, &second).await;

    assert_eq!(retried.status, ProcessingStatus::Success);
    assert_eq!(retried.bronze_metrics().unwrap().rows_processed, Some(2));
    assert_eq!(store.history(&bronze_table).await.unwrap().len(), 2);
    assert_eq!(store.table_size(&bronze_table).await.unwrap(), Some(6));

    fail_guard.teardown();
}
