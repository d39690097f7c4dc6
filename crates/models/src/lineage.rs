use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageEventType {
    Created,
    Updated,
    Deleted,
    Undeleted,
}

/// Append-only provenance of one record mutation. Within a record the
/// sequence is monotonic in source-row order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineageEvent {
    pub record_id: String,
    /// Dataset collection the record lives in.
    pub collection: String,
    pub event_seq: u64,
    pub event_type: LineageEventType,
    pub import_id: Uuid,
    pub file_key: String,
    /// Change-type letter from the source row.
    pub change_type: String,
    /// Old values of the fields that changed; None on creation.
    pub previous_values: Option<Document>,
    /// New values of the fields that changed.
    pub new_values: Option<Document>,
    pub event_date: DateTime<Utc>,
}

impl LineageEvent {
    pub fn doc_id(&self) -> String {
        format!("{}:{}:{}", self.collection, self.record_id, self.event_seq)
    }
}
