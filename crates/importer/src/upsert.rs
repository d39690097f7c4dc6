use crate::lineage::{LineageWriter, NewLineageEvent};
use chrono::Utc;
use doc_store::{DocumentStore, StoreError};
use models::fields::{BATCH_ID, CREATED_AT_UTC, IS_DELETED, UPDATED_AT_UTC};
use models::{ChangeType, DataSetDefinition, Document, LineageEventType};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// What applying one source row did to the target collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Deleted,
    Undeleted,
    /// The row matched the stored state exactly; nothing was written and
    /// no lineage was emitted, which is what makes row retries idempotent.
    Unchanged,
    /// A delete addressed a key that does not exist; counted, not an error.
    MissingSkipped,
    /// An update or reactivate addressed a key that does not exist; a
    /// per-row error for the caller.
    MissingTarget,
}

/// Applies parsed rows to dataset collections, stamping record metadata
/// and appending one lineage event per actual mutation.
#[derive(Clone)]
pub struct RecordUpserter {
    store: Arc<dyn DocumentStore>,
    lineage: LineageWriter,
}

impl RecordUpserter {
    pub fn new(store: Arc<dyn DocumentStore>, lineage: LineageWriter) -> RecordUpserter {
        RecordUpserter { store, lineage }
    }

    pub async fn apply(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        accumulators: Document,
    ) -> Result<Applied, StoreError> {
        let collection = def.name.as_str();
        let existing = self.store.get(collection, record_id).await?;

        match (change, existing) {
            (ChangeType::Insert, None) => {
                self.create(def, import_id, file_key, change, record_id, accumulators)
                    .await
            }
            (ChangeType::Insert, Some(current)) if is_deleted(&current) => {
                self.undelete(def, import_id, file_key, change, record_id, current, accumulators)
                    .await
            }
            // An insert over a live record behaves as an update.
            (ChangeType::Insert, Some(current)) | (ChangeType::Update, Some(current)) => {
                self.update(def, import_id, file_key, change, record_id, current, accumulators)
                    .await
            }
            (ChangeType::Update, None) => Ok(Applied::MissingTarget),
            (ChangeType::Delete, None) => Ok(Applied::MissingSkipped),
            (ChangeType::Delete, Some(current)) if is_deleted(&current) => Ok(Applied::Unchanged),
            (ChangeType::Delete, Some(current)) => {
                self.delete(def, import_id, file_key, change, record_id, current)
                    .await
            }
            (ChangeType::Reactivate, None) => Ok(Applied::MissingTarget),
            (ChangeType::Reactivate, Some(current)) if !is_deleted(&current) => {
                Ok(Applied::Unchanged)
            }
            (ChangeType::Reactivate, Some(current)) => {
                self.undelete(def, import_id, file_key, change, record_id, current, accumulators)
                    .await
            }
        }
    }

    async fn create(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        accumulators: Document,
    ) -> Result<Applied, StoreError> {
        let now = json!(Utc::now());
        let mut doc = accumulators.clone();
        doc.insert(IS_DELETED.to_string(), json!(false));
        doc.insert(CREATED_AT_UTC.to_string(), now.clone());
        doc.insert(UPDATED_AT_UTC.to_string(), now);
        doc.insert(BATCH_ID.to_string(), json!(import_id.to_string()));

        self.store.upsert(&def.name, record_id, doc).await?;
        self.emit(
            def,
            import_id,
            file_key,
            change,
            record_id,
            LineageEventType::Created,
            None,
            Some(accumulators),
        )
        .await?;
        Ok(Applied::Created)
    }

    async fn update(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        current: Document,
        accumulators: Document,
    ) -> Result<Applied, StoreError> {
        let (prev, next) = changed_fields(&current, &accumulators);
        if prev.is_empty() {
            return Ok(Applied::Unchanged);
        }

        let mut doc = current;
        for (field, value) in &next {
            doc.insert(field.clone(), value.clone());
        }
        doc.insert(UPDATED_AT_UTC.to_string(), json!(Utc::now()));
        doc.insert(BATCH_ID.to_string(), json!(import_id.to_string()));

        self.store.upsert(&def.name, record_id, doc).await?;
        self.emit(
            def,
            import_id,
            file_key,
            change,
            record_id,
            LineageEventType::Updated,
            Some(prev),
            Some(next),
        )
        .await?;
        Ok(Applied::Updated)
    }

    async fn delete(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        current: Document,
    ) -> Result<Applied, StoreError> {
        let mut doc = current;
        doc.insert(IS_DELETED.to_string(), json!(true));
        doc.insert(UPDATED_AT_UTC.to_string(), json!(Utc::now()));
        doc.insert(BATCH_ID.to_string(), json!(import_id.to_string()));

        self.store.upsert(&def.name, record_id, doc).await?;
        self.emit(
            def,
            import_id,
            file_key,
            change,
            record_id,
            LineageEventType::Deleted,
            Some(flag_doc(false)),
            Some(flag_doc(true)),
        )
        .await?;
        Ok(Applied::Deleted)
    }

    async fn undelete(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        current: Document,
        accumulators: Document,
    ) -> Result<Applied, StoreError> {
        let (mut prev, mut next) = changed_fields(&current, &accumulators);
        prev.insert(IS_DELETED.to_string(), json!(true));
        next.insert(IS_DELETED.to_string(), json!(false));

        let mut doc = current;
        for (field, value) in &accumulators {
            doc.insert(field.clone(), value.clone());
        }
        doc.insert(IS_DELETED.to_string(), json!(false));
        doc.insert(UPDATED_AT_UTC.to_string(), json!(Utc::now()));
        doc.insert(BATCH_ID.to_string(), json!(import_id.to_string()));

        self.store.upsert(&def.name, record_id, doc).await?;
        self.emit(
            def,
            import_id,
            file_key,
            change,
            record_id,
            LineageEventType::Undeleted,
            Some(prev),
            Some(next),
        )
        .await?;
        Ok(Applied::Undeleted)
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        def: &DataSetDefinition,
        import_id: Uuid,
        file_key: &str,
        change: ChangeType,
        record_id: &str,
        event_type: LineageEventType,
        previous_values: Option<Document>,
        new_values: Option<Document>,
    ) -> Result<(), StoreError> {
        self.lineage
            .append(NewLineageEvent {
                collection: &def.name,
                record_id,
                event_type,
                import_id,
                file_key,
                change_type: change.as_letter(),
                previous_values,
                new_values,
            })
            .await?;
        Ok(())
    }
}

fn is_deleted(doc: &Document) -> bool {
    doc.get(IS_DELETED) == Some(&Value::Bool(true))
}

fn flag_doc(deleted: bool) -> Document {
    [(IS_DELETED.to_string(), json!(deleted))].into_iter().collect()
}

/// The (old, new) values of accumulator fields that actually differ.
fn changed_fields(current: &Document, incoming: &Document) -> (Document, Document) {
    let mut prev = Document::new();
    let mut next = Document::new();
    for (field, value) in incoming {
        let old = current.get(field);
        if old != Some(value) {
            prev.insert(field.clone(), old.cloned().unwrap_or(Value::Null));
            next.insert(field.clone(), value.clone());
        }
    }
    (prev, next)
}

#[cfg(test)]
mod test {
    use super::*;
    use doc_store::MemoryStore;
    use models::DataSetRegistry;

    fn definition() -> DataSetDefinition {
        serde_json::from_value(json!({
            "name": "sam_cph_holding",
            "file_prefix_format": "LITP_SAMCPHHOLDING",
            "primary_key_columns": ["CPH"],
            "accumulator_columns": ["CPH", "FEATURE_NAME"],
        }))
        .unwrap()
    }

    fn acc(cph: &str, feature: &str) -> Document {
        [
            ("CPH".to_string(), json!(cph)),
            ("FEATURE_NAME".to_string(), json!(feature)),
        ]
        .into_iter()
        .collect()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        upserter: RecordUpserter,
        def: DataSetDefinition,
        import_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let lineage = LineageWriter::new(store.clone());
        Fixture {
            upserter: RecordUpserter::new(store.clone(), lineage.clone()),
            store,
            def: definition(),
            import_id: Uuid::new_v4(),
        }
    }

    impl Fixture {
        async fn apply(&self, change: ChangeType, accumulators: Document) -> Applied {
            self.upserter
                .apply(
                    &self.def,
                    self.import_id,
                    "f.enc",
                    change,
                    "12/345/6001",
                    accumulators,
                )
                .await
                .unwrap()
        }

        async fn stored(&self) -> Document {
            self.store
                .get("sam_cph_holding", "12/345/6001")
                .await
                .unwrap()
                .unwrap()
        }

        async fn lineage_count(&self) -> u64 {
            LineageWriter::new(self.store.clone())
                .events_for("sam_cph_holding", "12/345/6001")
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn insert_then_identical_insert_is_unchanged() {
        let fx = fixture();
        assert_eq!(fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await, Applied::Created);
        let stored = fx.stored().await;
        assert_eq!(stored.get(IS_DELETED), Some(&json!(false)));
        assert_eq!(stored.get(BATCH_ID), Some(&json!(fx.import_id.to_string())));
        assert!(stored.contains_key(CREATED_AT_UTC));

        // Retrying the same row writes nothing and emits no lineage.
        assert_eq!(fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await, Applied::Unchanged);
        assert_eq!(fx.lineage_count().await, 1);
    }

    #[tokio::test]
    async fn update_diffs_and_stamps_metadata() {
        let fx = fixture();
        fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await;
        let before = fx.stored().await;

        assert_eq!(fx.apply(ChangeType::Update, acc("12/345/6001", "Glebe Farm")).await, Applied::Updated);
        let after = fx.stored().await;
        assert_eq!(after.get("FEATURE_NAME"), Some(&json!("Glebe Farm")));
        let stamp = |doc: &Document| doc.get(UPDATED_AT_UTC).and_then(Value::as_str).map(String::from);
        assert!(stamp(&after) >= stamp(&before));
        assert_eq!(fx.lineage_count().await, 2);
    }

    #[tokio::test]
    async fn update_of_missing_key_is_a_row_error() {
        let fx = fixture();
        assert_eq!(fx.apply(ChangeType::Update, acc("12/345/6001", "x")).await, Applied::MissingTarget);
        assert_eq!(fx.apply(ChangeType::Reactivate, acc("12/345/6001", "x")).await, Applied::MissingTarget);
    }

    #[tokio::test]
    async fn delete_is_logical_and_idempotent() {
        let fx = fixture();
        fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await;
        assert_eq!(fx.apply(ChangeType::Delete, acc("12/345/6001", "Manor Farm")).await, Applied::Deleted);
        assert_eq!(fx.stored().await.get(IS_DELETED), Some(&json!(true)));

        // Deleting again and deleting the never-seen are both non-events.
        assert_eq!(fx.apply(ChangeType::Delete, acc("12/345/6001", "Manor Farm")).await, Applied::Unchanged);
        assert_eq!(
            fx.upserter
                .apply(&fx.def, fx.import_id, "f.enc", ChangeType::Delete, "99/999/9999", acc("99/999/9999", ""))
                .await
                .unwrap(),
            Applied::MissingSkipped,
        );
        assert_eq!(fx.lineage_count().await, 2);
    }

    #[tokio::test]
    async fn insert_over_deleted_record_undeletes() {
        let fx = fixture();
        fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await;
        fx.apply(ChangeType::Delete, acc("12/345/6001", "Manor Farm")).await;

        assert_eq!(fx.apply(ChangeType::Insert, acc("12/345/6001", "New Name")).await, Applied::Undeleted);
        let stored = fx.stored().await;
        assert_eq!(stored.get(IS_DELETED), Some(&json!(false)));
        assert_eq!(stored.get("FEATURE_NAME"), Some(&json!("New Name")));
    }

    #[tokio::test]
    async fn reactivate_undeletes_and_is_idempotent() {
        let fx = fixture();
        fx.apply(ChangeType::Insert, acc("12/345/6001", "Manor Farm")).await;
        fx.apply(ChangeType::Delete, acc("12/345/6001", "Manor Farm")).await;

        assert_eq!(fx.apply(ChangeType::Reactivate, acc("12/345/6001", "Manor Farm")).await, Applied::Undeleted);
        assert_eq!(fx.stored().await.get(IS_DELETED), Some(&json!(false)));
        assert_eq!(fx.apply(ChangeType::Reactivate, acc("12/345/6001", "Manor Farm")).await, Applied::Unchanged);
    }

    #[tokio::test]
    async fn registry_smoke_for_the_test_definition() {
        DataSetRegistry::new(vec![definition()]).unwrap();
    }
}
