use crate::status::OperationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One invocation of the cleanse analysis. At most one is Running per
/// cluster, enforced by the `cleanse-analysis` distributed lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanseOperation {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    /// Whole percent, 0..=100.
    pub progress_percent: u8,
    /// Human progress line maintained alongside the percentage.
    pub status_text: String,
    pub records_analyzed: u64,
    pub total_records: u64,
    pub issues_found: u64,
    pub issues_resolved: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Object key of the exported report archive, once written.
    pub report_key: Option<String>,
    /// Presigned download URL for the report archive.
    pub report_url: Option<String>,
}

impl CleanseOperation {
    pub fn new(operation_id: Uuid) -> CleanseOperation {
        CleanseOperation {
            operation_id,
            status: OperationStatus::NotStarted,
            progress_percent: 0,
            status_text: "Not started".to_string(),
            records_analyzed: 0,
            total_records: 0,
            issues_found: 0,
            issues_resolved: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            report_key: None,
            report_url: None,
        }
    }

    pub fn doc_id(&self) -> String {
        self.operation_id.to_string()
    }
}
