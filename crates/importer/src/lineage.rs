use chrono::Utc;
use doc_store::{DocumentStore, Filter, StoreError};
use models::{to_document, Document, LineageEvent, LineageEventType};
use std::sync::Arc;
use uuid::Uuid;

/// Collection the per-record lineage index lives in.
pub const LINEAGE_EVENTS: &str = "lineage_events";

/// Appends provenance events for record mutations. Sequence numbers are
/// monotonic per (collection, record).
#[derive(Clone)]
pub struct LineageWriter {
    store: Arc<dyn DocumentStore>,
}

pub struct NewLineageEvent<'a> {
    pub collection: &'a str,
    pub record_id: &'a str,
    pub event_type: LineageEventType,
    pub import_id: Uuid,
    pub file_key: &'a str,
    pub change_type: &'a str,
    pub previous_values: Option<Document>,
    pub new_values: Option<Document>,
}

impl LineageWriter {
    pub fn new(store: Arc<dyn DocumentStore>) -> LineageWriter {
        LineageWriter { store }
    }

    pub async fn append(&self, event: NewLineageEvent<'_>) -> Result<LineageEvent, StoreError> {
        let seq = self.next_seq(event.collection, event.record_id).await?;
        let event = LineageEvent {
            record_id: event.record_id.to_string(),
            collection: event.collection.to_string(),
            event_seq: seq,
            event_type: event.event_type,
            import_id: event.import_id,
            file_key: event.file_key.to_string(),
            change_type: event.change_type.to_string(),
            previous_values: event.previous_values,
            new_values: event.new_values,
            event_date: Utc::now(),
        };
        let doc = to_document(&event).map_err(|err| StoreError::Permanent(err.to_string()))?;
        self.store.upsert(LINEAGE_EVENTS, &event.doc_id(), doc).await?;
        Ok(event)
    }

    pub async fn events_for(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<u64, StoreError> {
        self.store
            .count(LINEAGE_EVENTS, &self.record_filter(collection, record_id))
            .await
    }

    /// A record's full event trail, in sequence order.
    pub async fn events(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Vec<LineageEvent>, StoreError> {
        let params = doc_store::QueryParameters::new(LINEAGE_EVENTS)
            .with_filter(self.record_filter(collection, record_id))
            .with_sort(vec![doc_store::SortKey::asc("event_seq")]);
        let result = self
            .store
            .query(&params)
            .await
            .map_err(|err| StoreError::Permanent(err.to_string()))?;
        result
            .data
            .iter()
            .map(|doc| {
                models::from_document(doc).map_err(|err| StoreError::Permanent(err.to_string()))
            })
            .collect()
    }

    async fn next_seq(&self, collection: &str, record_id: &str) -> Result<u64, StoreError> {
        Ok(self.events_for(collection, record_id).await? + 1)
    }

    fn record_filter(&self, collection: &str, record_id: &str) -> Filter {
        Filter::and([
            Filter::eq("collection", collection),
            Filter::eq("record_id", record_id),
        ])
    }
}
