//! End-to-end cleanse runs over in-memory stores: seeded CTS/SAM holding
//! collections, a full analysis with lock, deactivation and report export,
//! and the issue ledger checked between runs.

use cleanse::{rule_ids, CleanseConfig, CleanseCoordinator};
use doc_store::{DocumentStore, MemoryStore};
use models::{fields, issue_fingerprint, Document, OperationStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<MemoryStore>,
    internal: Arc<blob_store::MemoryStore>,
    coordinator: CleanseCoordinator,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let internal = Arc::new(blob_store::MemoryStore::new());
    let coordinator = CleanseCoordinator::new(
        store.clone(),
        internal.clone(),
        CleanseConfig::default(),
    )
    .await
    .unwrap();
    Harness {
        store,
        internal,
        coordinator,
    }
}

async fn seed_cts(harness: &Harness, id: &str, lid: &str, name: &str, emails: &str, phones: &str) {
    let doc: Document = [
        (fields::LID_FULL_IDENTIFIER.to_string(), json!(lid)),
        (fields::ADR_NAME.to_string(), json!(name)),
        (fields::ADR_EMAIL_ADDRESS.to_string(), json!(emails)),
        (fields::ADR_TELEPHONE_NUMBER.to_string(), json!(phones)),
        (fields::IS_DELETED.to_string(), json!(false)),
    ]
    .into_iter()
    .collect();
    harness.store.upsert("cts_cph_holding", id, doc).await.unwrap();
}

async fn seed_sam(
    harness: &Harness,
    id: &str,
    cph: &str,
    species: &str,
    feature: &str,
    emails: &str,
    phones: &str,
) {
    let doc: Document = [
        (fields::CPH.to_string(), json!(cph)),
        (fields::ANIMAL_SPECIES_CODE.to_string(), json!(species)),
        (fields::FEATURE_NAME.to_string(), json!(feature)),
        (fields::EMAIL_ADDRESS.to_string(), json!(emails)),
        (fields::TELEPHONE_NUMBER.to_string(), json!(phones)),
        (fields::IS_DELETED.to_string(), json!(false)),
    ]
    .into_iter()
    .collect();
    harness.store.upsert("sam_cph_holding", id, doc).await.unwrap();
}

async fn run(harness: &Harness) -> models::CleanseOperation {
    harness
        .coordinator
        .run_analysis()
        .await
        .unwrap()
        .expect("lock should be free")
}

#[tokio::test]
async fn cts_holding_without_sam_counterpart_raises_one_issue() {
    let h = harness().await;
    seed_cts(&h, "c1", "UK-12/345/6001", "Manor Farm", "a@x.com", "0100").await;

    let operation = run(&h).await;
    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.records_analyzed, 1);
    assert_eq!(operation.total_records, 1);
    assert_eq!(operation.issues_found, 1);

    let active = h.coordinator.issues().store().active_issues().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, rule_ids::CTS_CPH_NOT_IN_SAM);
    assert_eq!(active[0].context.cph.as_deref(), Some("12/345/6001"));

    // An identical second run re-observes the same fingerprint without
    // creating anything new.
    let fingerprint = issue_fingerprint("UK-12/345/6001", rule_ids::CTS_CPH_NOT_IN_SAM);
    let second = run(&h).await;
    assert_eq!(second.status, OperationStatus::Completed);
    assert_eq!(second.issues_resolved, 0);

    let active = h.coordinator.issues().store().active_issues().await.unwrap();
    assert_eq!(active.len(), 1);
    let issue = h.coordinator.issues().store().get(&fingerprint).await.unwrap().unwrap();
    assert_eq!(issue.last_seen_operation_id, second.operation_id);
    assert_eq!(
        h.coordinator.issues().store().history_count(&fingerprint).await.unwrap(),
        2,
    );

    // Both runs are listed, most recent first.
    let listed = h.coordinator.operations().list(0, 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].operation_id, second.operation_id);
    assert_eq!(listed[1].operation_id, operation.operation_id);
}

#[tokio::test]
async fn adding_the_sam_counterpart_resolves_the_issue() {
    let h = harness().await;
    seed_cts(&h, "c1", "UK-12/345/6001", "Manor Farm", "a@x.com", "0100").await;
    run(&h).await;
    assert_eq!(h.coordinator.issues().store().active_issues().await.unwrap().len(), 1);

    seed_sam(&h, "s1", "12/345/6001", "CTT", "Manor Farm", "a@x.com", "0100").await;
    let operation = run(&h).await;

    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.issues_resolved, 1);
    assert!(h.coordinator.issues().store().active_issues().await.unwrap().is_empty());

    let fingerprint = issue_fingerprint("UK-12/345/6001", rule_ids::CTS_CPH_NOT_IN_SAM);
    let issue = h.coordinator.issues().store().get(&fingerprint).await.unwrap().unwrap();
    assert!(!issue.active);
}

#[tokio::test]
async fn inconsistent_pairs_raise_the_pair_rules() {
    let h = harness().await;
    seed_cts(&h, "c1", "UK-12/345/6001", "Manor Farm", "a@x.com; b@x.com", "0100").await;
    seed_sam(&h, "s1", "12/345/6001", "SHP", "Unknown", "a@x.com", "0100").await;

    let operation = run(&h).await;
    assert_eq!(operation.records_analyzed, 2);

    let active = h.coordinator.issues().store().active_issues().await.unwrap();
    let rules: Vec<&str> = active.iter().map(|i| i.rule_id.as_str()).collect();
    // SAM_MISSING_EMAIL_ADDRESS and SAM_NO_CATTLE_UNIT fire; the cattle
    // location rule does not, because the holding is not a cattle unit.
    assert_eq!(
        rules,
        vec![rule_ids::SAM_MISSING_EMAIL_ADDRESS, rule_ids::SAM_NO_CATTLE_UNIT],
    );
}

#[tokio::test]
async fn sam_holding_without_cts_counterpart_raises_the_reverse_issue() {
    let h = harness().await;
    seed_sam(&h, "s1", "88/001/0001", "CTT", "Lone Farm", "", "").await;

    run(&h).await;
    let active = h.coordinator.issues().store().active_issues().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, rule_ids::SAM_CPH_NOT_IN_CTS);
    assert_eq!(active[0].primary_record_id, "88/001/0001");
}

#[tokio::test]
async fn out_of_range_counties_and_unparseable_identifiers_are_skipped() {
    let h = harness().await;
    // County 52 is outside the CTS range; the third row is unparseable.
    seed_cts(&h, "c1", "UK-12/345/6001", "Manor Farm", "", "").await;
    seed_cts(&h, "c2", "UK-52/345/6001", "Far Farm", "", "").await;
    seed_cts(&h, "c3", "not-a-lid", "Bad Farm", "", "").await;

    let operation = run(&h).await;
    // Every live row is observed, but only the in-range parseable one
    // reaches the rules.
    assert_eq!(operation.records_analyzed, 3);
    let active = h.coordinator.issues().store().active_issues().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].context.cph.as_deref(), Some("12/345/6001"));
}

#[tokio::test]
async fn report_exports_to_the_dated_key_with_a_presigned_url() {
    let h = harness().await;
    seed_cts(&h, "c1", "UK-12/345/6001", "Manor Farm", "a@x.com", "0100").await;

    let operation = run(&h).await;
    let stored = h
        .coordinator
        .operations()
        .get(operation.operation_id)
        .await
        .unwrap()
        .unwrap();

    let key = stored.report_key.expect("report key is stamped");
    assert!(key.starts_with("reports/"));
    assert!(key.ends_with(&format!("cleanse-report-{}.zip", operation.operation_id)));
    assert!(stored.report_url.is_some());

    use blob_store::BlobStore as _;
    let info = h.internal.head(&key).await.unwrap();
    assert_eq!(info.content_type.as_deref(), Some("application/zip"));

    // The archive holds a single CSV entry naming the issue.
    let bytes = h.internal.bytes_of(&key).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_index(0).unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
    assert!(content.starts_with("CPH,CTS LID Full Identifier"));
    assert!(content.contains("CTS_CPH_NOT_IN_SAM"));
}

#[tokio::test]
async fn concurrent_start_analysis_has_one_winner() {
    let h = harness().await;
    for holding in 0..250 {
        seed_cts(
            &h,
            &format!("c{holding}"),
            &format!("UK-12/345/{:04}", 1000 + holding),
            "Manor Farm",
            "a@x.com",
            "0100",
        )
        .await;
    }

    let first = h.coordinator.start_analysis().await.unwrap();
    let first = first.expect("first start wins the lock");
    assert_eq!(first.status, OperationStatus::Running);

    // While the first run holds the lock, a second start yields nothing.
    assert!(h.coordinator.start_analysis().await.unwrap().is_none());

    // After it completes and releases, a third start succeeds.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let status = h
            .coordinator
            .operations()
            .get(first.operation_id)
            .await
            .unwrap()
            .unwrap()
            .status;
        if status != OperationStatus::Running {
            assert_eq!(status, OperationStatus::Completed);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "analysis overran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let third = h.coordinator.start_analysis().await.unwrap();
    assert!(third.is_some());
}
