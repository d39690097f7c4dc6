//! End-to-end import runs over in-memory stores: encrypted drops land in
//! the external store, the orchestrator acquires and ingests them, and the
//! dataset collection, file reports and lineage index are checked.

use doc_store::{DocumentStore, Filter, MemoryStore as MemoryDocStore, QueryParameters};
use importer::{ImportConfig, ImportOrchestrator, LINEAGE_EVENTS};
use models::fields;
use models::{DataSetDefinition, DataSetRegistry, FileProcessingStatus, ImportStatus};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SALT: &str = "Jr8Lm2PXzd7qNbVyWutRfGBxhkHTpE";

struct Harness {
    external: Arc<blob_store::MemoryStore>,
    internal: Arc<blob_store::MemoryStore>,
    store: Arc<MemoryDocStore>,
    orchestrator: ImportOrchestrator,
}

fn harness() -> Harness {
    let external = Arc::new(blob_store::MemoryStore::new());
    let internal = Arc::new(blob_store::MemoryStore::new());
    let store = Arc::new(MemoryDocStore::new());
    let registry = Arc::new(
        DataSetRegistry::new(vec![DataSetDefinition {
            name: "sam_cph_holding".to_string(),
            file_prefix_format: "LITP_SAMCPHHOLDING".to_string(),
            date_format: "%Y%m%d".to_string(),
            primary_key_columns: vec![fields::CPH.to_string()],
            change_type_column: fields::CHANGE_TYPE.to_string(),
            accumulator_columns: vec![
                fields::CPH.to_string(),
                fields::FEATURE_NAME.to_string(),
            ],
        }])
        .unwrap(),
    );
    let mut config = ImportConfig::new(SALT);
    config.target_internal_prefix = "verified".to_string();

    let orchestrator = ImportOrchestrator::new(
        external.clone(),
        internal.clone(),
        store.clone(),
        registry,
        config,
    );
    Harness {
        external,
        internal,
        store,
        orchestrator,
    }
}

/// Encrypt a CSV body under the password derived from `file_name` and drop
/// it into the external store.
async fn drop_file(harness: &Harness, file_name: &str, body: &str) {
    drop_file_with_password(
        harness,
        file_name,
        body,
        &stream_crypto::derive_password(file_name).unwrap(),
    )
    .await;
}

async fn drop_file_with_password(harness: &Harness, file_name: &str, body: &str, password: &str) {
    let mut plain = std::io::Cursor::new(body.as_bytes().to_vec());
    let mut cipher = Vec::new();
    stream_crypto::encrypt_stream(&mut plain, &mut cipher, password, SALT, None, |_| {})
        .await
        .unwrap();

    use blob_store::BlobStore as _;
    let mut reader = std::io::Cursor::new(cipher);
    harness
        .external
        .upload(file_name, &mut reader, "application/octet-stream", &Default::default())
        .await
        .unwrap();
}

async fn run_import(harness: &Harness) -> models::ImportRun {
    harness
        .orchestrator
        .start(Uuid::new_v4(), "external", &CancellationToken::new())
        .await
        .unwrap()
}

async fn collection_docs(harness: &Harness, deleted: bool) -> Vec<models::Document> {
    let params = QueryParameters::new("sam_cph_holding")
        .with_filter(Filter::eq(fields::IS_DELETED, deleted));
    harness.store.query(&params).await.unwrap().data
}

async fn lineage_events(harness: &Harness) -> Vec<models::Document> {
    let params = QueryParameters::new(LINEAGE_EVENTS);
    harness.store.query(&params).await.unwrap().data
}

fn ten_insert_rows() -> String {
    let mut body = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 1..=10 {
        body.push_str(&format!("12/345/600{}|Farm {}|I\n", holding % 10, holding));
    }
    body
}

#[tokio::test]
async fn single_file_happy_path() {
    let harness = harness();
    let mut body = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 6001..6011 {
        body.push_str(&format!("12/345/{holding}|Farm {holding}|I\n"));
    }
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &body).await;

    let run = run_import(&harness).await;

    assert_eq!(run.status, ImportStatus::Completed);
    assert_eq!(run.acquisition.files_discovered, 1);
    assert_eq!(run.acquisition.files_processed, 1);
    assert_eq!(run.acquisition.files_failed, 0);
    assert_eq!(run.ingestion.records_created, 10);
    assert_eq!(run.ingestion.records_processed, 10);

    // The verified ciphertext copy landed under the target prefix with its
    // hash and provenance stamped as user metadata.
    use blob_store::BlobStore as _;
    let info = harness
        .internal
        .head("verified/LITP_SAMCPHHOLDING_20250101.csv.enc")
        .await
        .unwrap();
    assert_eq!(info.metadata.get(fields::metadata::DATASET).unwrap(), "sam_cph_holding");
    assert!(info.metadata.contains_key(fields::metadata::MD5));

    let active = collection_docs(&harness, false).await;
    assert_eq!(active.len(), 10);
    assert!(active
        .iter()
        .all(|doc| doc.get(fields::BATCH_ID) == Some(&serde_json::json!(run.import_id.to_string()))));

    let events = lineage_events(&harness).await;
    assert_eq!(events.len(), 10);
    assert!(events
        .iter()
        .all(|e| e.get("event_type") == Some(&serde_json::json!("Created"))));

    let files = harness
        .orchestrator
        .reporter()
        .get_file_reports(run.import_id)
        .await
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].status, FileProcessingStatus::Ingested);
    assert_eq!(files[0].ingestion.rows_total, 10);
}

#[tokio::test]
async fn delta_file_mixes_inserts_updates_and_deletes() {
    let harness = harness();
    let mut first = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 6001..6011 {
        first.push_str(&format!("12/345/{holding}|Farm {holding}|I\n"));
    }
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &first).await;
    let first_run = run_import(&harness).await;
    assert_eq!(first_run.status, ImportStatus::Completed);

    let mut delta = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 7001..7006 {
        delta.push_str(&format!("12/345/{holding}|New Farm {holding}|I\n"));
    }
    for holding in 6001..6004 {
        delta.push_str(&format!("12/345/{holding}|Renamed {holding}|U\n"));
    }
    for holding in 6004..6006 {
        delta.push_str(&format!("12/345/{holding}|Farm {holding}|D\n"));
    }
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250102.csv.enc", &delta).await;

    let run = run_import(&harness).await;
    assert_eq!(run.status, ImportStatus::Completed);

    // The unchanged first file is skipped on re-listing, not re-ingested.
    assert_eq!(run.acquisition.files_discovered, 2);
    assert_eq!(run.acquisition.files_skipped, 1);
    assert_eq!(run.acquisition.files_processed, 1);

    assert_eq!(run.ingestion.records_created, 5);
    assert_eq!(run.ingestion.records_updated, 3);
    assert_eq!(run.ingestion.records_deleted, 2);

    assert_eq!(collection_docs(&harness, false).await.len(), 13);
    assert_eq!(collection_docs(&harness, true).await.len(), 2);
    assert_eq!(lineage_events(&harness).await.len(), 20);

    // An updated record's trail reads Created then Updated, in order.
    let writer = importer::LineageWriter::new(harness.store.clone());
    let trail = writer.events("sam_cph_holding", "12/345/6001").await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].event_seq, 1);
    assert_eq!(trail[0].event_type, models::LineageEventType::Created);
    assert_eq!(trail[1].event_seq, 2);
    assert_eq!(trail[1].event_type, models::LineageEventType::Updated);
    assert_eq!(trail[1].change_type, "U");
    assert_eq!(
        trail[1].new_values.as_ref().unwrap().get(fields::FEATURE_NAME),
        Some(&serde_json::json!("Renamed 6001")),
    );
}

#[tokio::test]
async fn wrong_credentials_fail_the_file_and_the_import() {
    let harness = harness();
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &ten_insert_rows()).await;
    // The second file's ciphertext is valid but was not produced with the
    // password its name derives.
    drop_file_with_password(
        &harness,
        "LITP_SAMCPHHOLDING_20250103.csv.enc",
        "CPH|FEATURE_NAME|CHANGETYPE\n55/555/5555|Bad Farm|I\n",
        "completely-different-password",
    )
    .await;

    let run = run_import(&harness).await;

    assert_eq!(run.status, ImportStatus::Failed);
    assert_eq!(run.acquisition.files_failed, 1);
    // The good file still went through.
    assert_eq!(run.ingestion.records_created, 10);

    let files = harness
        .orchestrator
        .reporter()
        .get_file_reports(run.import_id)
        .await
        .unwrap();
    let bad = files
        .iter()
        .find(|f| f.source_key.contains("20250103"))
        .unwrap();
    assert_eq!(bad.status, FileProcessingStatus::Failed);
    assert!(bad.error.as_deref().unwrap_or("").contains("bad credentials"));

    // No row of the bad file reached the collection or the lineage index.
    let active = collection_docs(&harness, false).await;
    assert!(active
        .iter()
        .all(|doc| models::str_field(doc, fields::CPH) != "55/555/5555"));
    assert_eq!(lineage_events(&harness).await.len(), 10);
}

#[tokio::test]
async fn unmatched_keys_are_counted_as_skipped() {
    let harness = harness();
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &ten_insert_rows()).await;
    use blob_store::BlobStore as _;
    let mut stray = std::io::Cursor::new(b"not ours".to_vec());
    harness
        .external
        .upload("UNRELATED_FILE_20250101.txt", &mut stray, "text/plain", &Default::default())
        .await
        .unwrap();

    let run = run_import(&harness).await;
    assert_eq!(run.status, ImportStatus::Completed);
    assert_eq!(run.acquisition.files_discovered, 2);
    assert_eq!(run.acquisition.files_skipped, 1);
    assert_eq!(run.acquisition.files_processed, 1);
}

#[tokio::test]
async fn cancelled_import_stops_and_fails() {
    let harness = harness();
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &ten_insert_rows()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = harness
        .orchestrator
        .start(Uuid::new_v4(), "external", &cancel)
        .await
        .unwrap();

    assert_eq!(run.status, ImportStatus::Failed);
    assert!(run
        .acquisition
        .error
        .as_deref()
        .unwrap_or("")
        .contains("cancelled"));
    assert_eq!(collection_docs(&harness, false).await.len(), 0);
}

#[tokio::test]
async fn restarting_a_completed_import_is_a_no_op() {
    let harness = harness();
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &ten_insert_rows()).await;

    let import_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let first = harness
        .orchestrator
        .start(import_id, "external", &cancel)
        .await
        .unwrap();
    assert_eq!(first.status, ImportStatus::Completed);

    let again = harness
        .orchestrator
        .start(import_id, "external", &cancel)
        .await
        .unwrap();
    assert_eq!(again.completed_at, first.completed_at);
    // No second pass touched the data.
    assert_eq!(lineage_events(&harness).await.len(), 10);
}

#[tokio::test]
async fn worker_pool_ingests_disjoint_files_concurrently() {
    let external = Arc::new(blob_store::MemoryStore::new());
    let internal = Arc::new(blob_store::MemoryStore::new());
    let store = Arc::new(MemoryDocStore::new());
    let registry = Arc::new(
        DataSetRegistry::new(vec![DataSetDefinition {
            name: "sam_cph_holding".to_string(),
            file_prefix_format: "LITP_SAMCPHHOLDING".to_string(),
            date_format: "%Y%m%d".to_string(),
            primary_key_columns: vec![fields::CPH.to_string()],
            change_type_column: fields::CHANGE_TYPE.to_string(),
            accumulator_columns: vec![fields::CPH.to_string(), fields::FEATURE_NAME.to_string()],
        }])
        .unwrap(),
    );
    let mut config = ImportConfig::new(SALT);
    config.ingest_workers = 2;
    let orchestrator = ImportOrchestrator::new(
        external.clone(),
        internal.clone(),
        store.clone(),
        registry,
        config,
    );
    let harness = Harness {
        external,
        internal,
        store,
        orchestrator,
    };

    // Two files over disjoint primary-key spaces, the safe case for N > 1.
    let mut first = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 1000..1020 {
        first.push_str(&format!("11/111/{holding}|A {holding}|I\n"));
    }
    let mut second = String::from("CPH|FEATURE_NAME|CHANGETYPE\n");
    for holding in 2000..2020 {
        second.push_str(&format!("22/222/{holding}|B {holding}|I\n"));
    }
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &first).await;
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250102.csv.enc", &second).await;

    let run = harness
        .orchestrator
        .start(Uuid::new_v4(), "external", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(run.status, ImportStatus::Completed);
    assert_eq!(run.ingestion.files_processed, 2);
    assert_eq!(run.ingestion.records_created, 40);
    assert_eq!(collection_docs(&harness, false).await.len(), 40);
}

#[tokio::test]
async fn waiting_on_a_finished_import_returns_its_report() {
    let harness = harness();
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", &ten_insert_rows()).await;

    let import_id = Uuid::new_v4();
    harness
        .orchestrator
        .start(import_id, "external", &CancellationToken::new())
        .await
        .unwrap();

    let run = harness
        .orchestrator
        .wait_for_completion(import_id)
        .await
        .unwrap();
    assert_eq!(run.status, ImportStatus::Completed);

    let missing = harness
        .orchestrator
        .wait_for_completion(Uuid::new_v4())
        .await;
    assert!(matches!(missing, Err(importer::WaitError::NotFound(_))));
}

#[tokio::test]
async fn row_errors_are_counted_without_failing_the_file() {
    let harness = harness();
    let body = "CPH|FEATURE_NAME|CHANGETYPE\n\
        12/345/6001|Farm 1|I\n\
        12/345/6002|Farm 2|X\n\
        12/345/6003|Farm 3|U\n\
        12/345/6004|Farm 4\n\
        12/345/6005|Farm 5|I\n";
    drop_file(&harness, "LITP_SAMCPHHOLDING_20250101.csv.enc", body).await;

    let run = run_import(&harness).await;
    // Row errors never fail an import by themselves.
    assert_eq!(run.status, ImportStatus::Completed);
    assert_eq!(run.ingestion.records_created, 2);

    let files = harness
        .orchestrator
        .reporter()
        .get_file_reports(run.import_id)
        .await
        .unwrap();
    let detail = &files[0].ingestion;
    assert_eq!(detail.rows_total, 5);
    assert_eq!(detail.rows_failed, 3);
    assert_eq!(detail.row_errors.len(), 3);
    assert_eq!(detail.row_errors[0].row, 2);
    assert!(detail.row_errors[0].detail.contains("unknown change type"));
    assert!(detail.row_errors[1].detail.contains("does not exist"));
    assert!(detail.row_errors[2].detail.contains("columns"));
    assert_eq!(files[0].status, FileProcessingStatus::Ingested);
}
