use medallion::sink::ResultSink;
use medallion::sink::jsonl::JsonlResultSink;
use medallion::test_utils::fixtures::{TEST_SOURCE, TestPipeline, customer_rows, keyed_table, run_ts};
use medallion::types::{Layer, ProcessingStatus, RunStatus};
use medallion::workers::{choose_worker_count, run_bronze_layer, run_silver_layer};
use medallion_config::shared::{TableConfig, WorkerConfig};
use medallion_telemetry::tracing::init_test_tracing;

fn tables() -> Vec<TableConfig> {
    vec![
        keyed_table("customers", "incremental"),
        keyed_table("products", "snapshot"),
        keyed_table("invoices", "incremental"),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn layers_report_every_table_in_plan_order() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "customers", customer_rows(1..=3, "v1")).await;
    pipeline.export(&ts, "products", customer_rows(1..=2, "v1")).await;
    let plan = pipeline.plan(&ts, tables());

    let bronze = run_bronze_layer(pipeline.shared_bronze_loader(), &pipeline.sink, &plan, 2)
        .await
        .unwrap();
    let silver = run_silver_layer(pipeline.shared_silver_merger(), &pipeline.sink, &plan, 2)
        .await
        .unwrap();

    let statuses: Vec<_> = bronze.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProcessingStatus::Success,
            ProcessingStatus::Success,
            ProcessingStatus::Skipped
        ]
    );
    assert_eq!(bronze.summary.status, RunStatus::Success);
    assert_eq!(bronze.summary.tables_skipped, 1);
    assert_eq!(bronze.summary.total_rows, 5);
    assert_eq!(bronze.summary.workers, 2);

    assert_eq!(silver.results[2].table_name, "invoices");
    assert_eq!(silver.results[2].status, ProcessingStatus::Failed);
    assert_eq!(silver.summary.status, RunStatus::Partial);
    assert_eq!(silver.summary.failed_tables, vec!["invoices".to_string()]);
    assert_eq!(silver.summary.total_inserts, 5);
    assert_eq!(silver.summary.total_deletes, 0);

    assert_eq!(pipeline.sink.results().await.len(), 6);
    let summaries = pipeline.sink.summaries().await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].layer, Layer::Bronze);
    assert_eq!(summaries[1].layer, Layer::Silver);
    assert_eq!(summaries[1].run_id, "run-20250301T060000000");
}

#[tokio::test(flavor = "multi_thread")]
async fn every_table_failing_fails_the_run() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    let plan = pipeline.plan(&ts, vec![keyed_table("customers", "incremental")]);

    let silver = run_silver_layer(pipeline.shared_silver_merger(), &pipeline.sink, &plan, 1)
        .await
        .unwrap();

    assert_eq!(silver.summary.status, RunStatus::Failed);
    assert_eq!(silver.summary.tables_failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn jsonl_summaries_feed_the_worker_heuristic() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonlResultSink::new(dir.path().join("logs/processing.jsonl"));
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "customers", customer_rows(1..=3, "v1")).await;
    let plan = pipeline.plan(&ts, vec![keyed_table("customers", "incremental")]);

    let report = run_bronze_layer(pipeline.shared_bronze_loader(), &sink, &plan, 3)
        .await
        .unwrap();

    let history = sink.run_summaries(TEST_SOURCE, Layer::Bronze).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].log_id, report.summary.log_id);
    assert_eq!(history[0].workers, 3);
    assert_eq!(history[0].total_rows, 3);
    assert!(sink.run_summaries(TEST_SOURCE, Layer::Silver).await.unwrap().is_empty());

    // A single tiny run is either unusable or capped at two workers, a step of at most two.
    let workers = choose_worker_count(&history, TEST_SOURCE, &WorkerConfig::default());
    assert!((1..=3).contains(&workers));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_tables_from_the_log_drive_a_retry() {
    init_test_tracing();
    let pipeline = TestPipeline::new();
    let ts = run_ts("20250301T060000000");
    pipeline.export(&ts, "customers", customer_rows(1..=3, "v1")).await;
    pipeline.export(&ts, "products", customer_rows(1..=2, "v1")).await;
    let plan = pipeline.plan(&ts, tables());
    run_bronze_layer(pipeline.shared_bronze_loader(), &pipeline.sink, &plan, 2)
        .await
        .unwrap();
    run_silver_layer(pipeline.shared_silver_merger(), &pipeline.sink, &plan, 2)
        .await
        .unwrap();

    let failed = pipeline
        .sink
        .failed_tables(TEST_SOURCE, ts.as_str(), Layer::Silver)
        .await
        .unwrap();
    assert_eq!(failed, vec!["invoices".to_string()]);

    pipeline.export(&ts, "invoices", customer_rows(1..=4, "v1")).await;
    let retry_tables = tables()
        .into_iter()
        .filter(|table| failed.contains(&table.name))
        .collect();
    let retry = pipeline.plan(&ts, retry_tables);
    run_bronze_layer(pipeline.shared_bronze_loader(), &pipeline.sink, &retry, 1)
        .await
        .unwrap();
    run_silver_layer(pipeline.shared_silver_merger(), &pipeline.sink, &retry, 1)
        .await
        .unwrap();

    let sink = &pipeline.sink;
    assert!(
        sink.failed_tables(TEST_SOURCE, ts.as_str(), Layer::Silver)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        sink.successful_tables(TEST_SOURCE, ts.as_str(), Layer::Silver)
            .await
            .unwrap(),
        vec![
            "customers".to_string(),
            "products".to_string(),
            "invoices".to_string()
        ]
    );
    assert!(
        sink.is_table_processed(TEST_SOURCE, ts.as_str(), "invoices", Layer::Bronze)
            .await
            .unwrap()
    );
    let latest = sink
        .latest_run_summary(TEST_SOURCE, Layer::Silver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.total_tables, 1);
    assert_eq!(latest.status, RunStatus::Success);
}
