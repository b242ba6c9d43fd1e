use std::path::Path;

use medallion::bronze::BronzeLoader;
use medallion::columns::IS_DELETED;
use medallion::silver::SilverMerger;
use medallion::source::local::LocalFileReader;
use medallion::source::{FilesRootResolver, export_path};
use medallion::store::TableStore;
use medallion::store::local::LocalTableStore;
use medallion::test_utils::fixtures::{
    TEST_BASE_FILES, TEST_SOURCE, TestPipeline, keyed_table, run_ts,
};
use medallion::types::{Cell, ProcessingStatus, RowSet, RunTimestamp};
use medallion_config::shared::TableName;
use medallion_telemetry::tracing::init_test_tracing;

fn write_export(files_root: &Path, run_ts: &RunTimestamp, table: &str, lines: &[&str]) {
    let location = files_root.join(export_path(TEST_BASE_FILES, TEST_SOURCE, run_ts, table));
    std::fs::create_dir_all(&location).unwrap();
    std::fs::write(location.join("part-00000.jsonl"), lines.join("\n")).unwrap();
    std::fs::write(location.join("_SUCCESS"), "").unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn json_lines_exports_flow_into_silver_on_disk() {
    init_test_tracing();
    let files_root = tempfile::tempdir().unwrap();
    let warehouse = tempfile::tempdir().unwrap();
    let store = LocalTableStore::new(warehouse.path());
    let loader = BronzeLoader::new(
        store.clone(),
        LocalFileReader::new(),
        FilesRootResolver::new(files_root.path()),
    );
    let merger = SilverMerger::new(store.clone());
    let table = keyed_table("relaties", "incremental");
    let ts = run_ts("20250301T060000000");

    write_export(
        files_root.path(),
        &ts,
        "relaties",
        &[
            r#"{"id": 1, "name": "Jansen", "city": "Utrecht"}"#,
            r#"{"id": 2, "name": "de Vries", "city": null}"#,
        ],
    );

    let bronze = loader
        .process_bronze_table(&table, TEST_SOURCE, "run-1", &ts, ts.run_date(), TEST_BASE_FILES)
        .await
        .unwrap();
    let silver = merger
        .process_silver_cdc_merge(&table, TEST_SOURCE, "run-1", &ts)
        .await
        .unwrap();

    assert_eq!(bronze.status, ProcessingStatus::Success);
    assert_eq!(bronze.bronze_metrics().unwrap().rows_processed, Some(2));
    assert_eq!(silver.status, ProcessingStatus::Success);
    assert_eq!(silver.silver_metrics().unwrap().rows_inserted, Some(2));

    assert!(
        warehouse
            .path()
            .join("silver/relaties/_log.jsonl")
            .exists()
    );
    let rows = store
        .read_table(&TableName::new("silver", "relaties"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let second = (0..rows.len())
        .find(|&index| rows.value(index, "id") == Some(&Cell::I64(2)))
        .unwrap();
    assert_eq!(rows.value(second, "city"), Some(&Cell::Null));
    assert_eq!(rows.value(second, IS_DELETED), Some(&Cell::Bool(false)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_bronze_table_is_recreated() {
    init_test_tracing();
    let files_root = tempfile::tempdir().unwrap();
    let warehouse = tempfile::tempdir().unwrap();
    let store = LocalTableStore::new(warehouse.path());
    let loader = BronzeLoader::new(
        store.clone(),
        LocalFileReader::new(),
        FilesRootResolver::new(files_root.path()),
    );
    let table = keyed_table("producten", "snapshot");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    write_export(files_root.path(), &first, "producten", &[r#"{"id": 1}"#]);
    write_export(
        files_root.path(),
        &second,
        "producten",
        &[r#"{"id": 1}"#, r#"{"id": 2}"#],
    );

    loader
        .process_bronze_table(&table, TEST_SOURCE, "run-1", &first, first.run_date(), TEST_BASE_FILES)
        .await
        .unwrap();
    let bronze_table = TableName::new("bronze", "producten");
    std::fs::write(store.data_file_path(&bronze_table, 0), "{not json").unwrap();

    let result = loader
        .process_bronze_table(&table, TEST_SOURCE, "run-2", &second, second.run_date(), TEST_BASE_FILES)
        .await
        .unwrap();

    assert_eq!(result.status, ProcessingStatus::Success);
    assert_eq!(result.bronze_metrics().unwrap().rows_processed, Some(2));
    assert!(
        result
            .error_message
            .unwrap()
            .starts_with("Initial write failed but table was recreated. Original error: Unreadable table metadata")
    );
    assert_eq!(store.history(&bronze_table).await.unwrap().len(), 1);
    assert_eq!(store.read_table(&bronze_table).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn non_finite_values_keep_the_incremental_history() {
    init_test_tracing();
    let warehouse = tempfile::tempdir().unwrap();
    let store = LocalTableStore::new(warehouse.path());
    let pipeline = TestPipeline::with_store(store.clone());
    let table = keyed_table("metingen", "incremental");
    let first = run_ts("20250301T060000000");
    let second = run_ts("20250302T060000000");
    pipeline
        .export(
            &first,
            "metingen",
            RowSet::from_records(vec![vec![("id", Cell::I64(1)), ("v", Cell::F64(f64::NAN))]]),
        )
        .await;
    pipeline
        .export(
            &second,
            "metingen",
            RowSet::from_records(vec![vec![("id", Cell::I64(1)), ("v", Cell::F64(1.0))]]),
        )
        .await;

    for (run_id, ts) in [("run-1", &first), ("run-2", &second)] {
        let result = pipeline
            .bronze_loader()
            .process_bronze_table(&table, TEST_SOURCE, run_id, ts, ts.run_date(), TEST_BASE_FILES)
            .await
            .unwrap();

        assert_eq!(result.status, ProcessingStatus::Success);
        assert_eq!(result.error_message, None);
    }

    let bronze_table = TableName::new("bronze", "metingen");
    assert_eq!(store.history(&bronze_table).await.unwrap().len(), 2);
    let rows = store.read_table(&bronze_table).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(matches!(rows.value(0, "v"), Some(Cell::F64(v)) if v.is_nan()));

    let silver = pipeline
        .silver_merger()
        .process_silver_cdc_merge(&table, TEST_SOURCE, "run-2", &second)
        .await
        .unwrap();
    assert_eq!(silver.status, ProcessingStatus::Success);
    assert_eq!(silver.silver_metrics().unwrap().rows_inserted, Some(1));
}
