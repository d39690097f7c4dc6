//! The two-phase import pipeline: acquisition copies encrypted drops from
//! the external store into the internal store with their ciphertext
//! verified; ingestion decrypts, parses and applies them to dataset
//! collections, emitting per-record lineage. The orchestrator runs both
//! phases and owns the run's terminal status.

mod acquisition;
mod config;
mod ingestion;
mod lineage;
mod orchestrator;
mod reporter;
mod retry;
mod upsert;

pub use acquisition::AcquisitionPipeline;
pub use config::ImportConfig;
pub use ingestion::IngestionPipeline;
pub use lineage::{LineageWriter, NewLineageEvent, LINEAGE_EVENTS};
pub use orchestrator::{ImportOrchestrator, WaitError};
pub use reporter::ImportReporter;
pub use retry::with_retries;
pub use upsert::{Applied, RecordUpserter};

/// Flatten an error and its source chain into one report line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut line = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("object store failure")]
    Blob(#[from] blob_store::StoreError),
    #[error("crypto failure")]
    Crypto(#[from] stream_crypto::Error),
    #[error("document store failure")]
    Store(#[from] doc_store::StoreError),
    #[error("report query failure")]
    Query(#[from] doc_store::QueryError),
    #[error("report serialization failure")]
    Serde(#[from] serde_json::Error),
}
