//! The cleanse analysis: a singleton-per-cluster batch job that scans the
//! CTS and SAM views of CPH holdings, evaluates a priority-ordered rule
//! set, records issues idempotently by stable fingerprint, and exports a
//! compressed CSV report. The coordinator guards the run with a renewable
//! distributed lock.

mod config;
mod coordinator;
mod engine;
mod exporter;
mod issue_store;
mod operations;
mod queries;
mod rules;

pub use config::CleanseConfig;
pub use coordinator::{CleanseCoordinator, ANALYSIS_LOCK};
pub use engine::{CleanseEngine, PumpContext};
pub use exporter::ReportExporter;
pub use issue_store::{IssueCommandService, IssueStore, RecordIssueCommand};
pub use operations::OperationStore;
pub use queries::CtsSamQueryService;
pub use rules::{cts_sam_rules, ids as rule_ids, Rule, RulePair};

#[derive(Debug, thiserror::Error)]
pub enum CleanseError {
    #[error("analysis was cancelled")]
    Cancelled,
    #[error("document store failure")]
    Store(#[from] doc_store::StoreError),
    #[error("query failure")]
    Query(#[from] doc_store::QueryError),
    #[error("object store failure")]
    Blob(#[from] blob_store::StoreError),
    #[error("lock failure")]
    Lock(#[from] dist_lock::LockError),
    #[error("report serialization failure")]
    Serde(#[from] serde_json::Error),
    #[error("report assembly failure: {0}")]
    Report(String),
}
