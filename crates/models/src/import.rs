use crate::status::{FileProcessingStatus, ImportStatus, PhaseStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseKind {
    Acquisition,
    Ingestion,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PhaseKind::Acquisition => f.write_str("acquisition"),
            PhaseKind::Ingestion => f.write_str("ingestion"),
        }
    }
}

/// Progress of one phase within an import. Counters are monotonic within a
/// run; `files_processed + files_failed + files_skipped <= files_discovered`,
/// with equality on completion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub status: Option<PhaseStatus>,
    pub files_discovered: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    /// Most recently started file, when the phase is running.
    pub current_file: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PhaseProgress {
    pub fn status(&self) -> PhaseStatus {
        self.status.unwrap_or(PhaseStatus::Pending)
    }

    pub fn running(started_at: DateTime<Utc>) -> PhaseProgress {
        PhaseProgress {
            status: Some(PhaseStatus::Running),
            started_at: Some(started_at),
            ..Default::default()
        }
    }
}

/// One import run: created when the orchestrator starts, terminal on
/// Completed or Failed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRun {
    pub import_id: Uuid,
    /// `internal` or `external`, naming the store files are pulled from.
    pub source_type: String,
    pub status: ImportStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub acquisition: PhaseProgress,
    pub ingestion: PhaseProgress,
    pub error: Option<String>,
}

impl ImportRun {
    pub fn started(import_id: Uuid, source_type: &str, now: DateTime<Utc>) -> ImportRun {
        ImportRun {
            import_id,
            source_type: source_type.to_string(),
            status: ImportStatus::Started,
            started_at: now,
            completed_at: None,
            acquisition: PhaseProgress::default(),
            ingestion: PhaseProgress::default(),
            error: None,
        }
    }

    pub fn doc_id(&self) -> String {
        self.import_id.to_string()
    }
}

/// A per-row failure recorded on the file's ingestion detail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: u64,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileAcquisitionDetail {
    pub acquired_at: Option<DateTime<Utc>>,
    /// Time spent validating the derived password against the ciphertext.
    pub decryption_check_ms: u64,
    /// True when the internal store already held an identical ciphertext.
    pub skipped_unchanged: bool,
}

/// Caps how many per-row errors a single file report retains.
pub const MAX_ROW_ERRORS: usize = 50;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileIngestionDetail {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rows_total: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub records_unchanged: u64,
    pub rows_failed: u64,
    pub rows_skipped: u64,
    pub row_errors: Vec<RowError>,
}

impl FileIngestionDetail {
    pub fn push_row_error(&mut self, row: u64, detail: impl Into<String>) {
        self.rows_failed += 1;
        if self.row_errors.len() < MAX_ROW_ERRORS {
            self.row_errors.push(RowError {
                row,
                detail: detail.into(),
            });
        }
    }
}

/// Per-file lineage of an import: created on discovery, mutated as the file
/// moves through acquisition and ingestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub import_id: Uuid,
    /// Key of the ciphertext copy in the internal store.
    pub file_key: String,
    /// Key the file was discovered under in the source store.
    pub source_key: String,
    pub dataset: String,
    /// Business date parsed from the file name.
    pub logical_date: Option<chrono::NaiveDate>,
    pub status: FileProcessingStatus,
    pub size_bytes: u64,
    /// Content hash of the ciphertext, as landed in the internal store.
    pub ciphertext_md5: Option<String>,
    /// Content hash of the decrypted payload, stamped during ingestion.
    pub plaintext_md5: Option<String>,
    pub acquisition: FileAcquisitionDetail,
    pub ingestion: FileIngestionDetail,
    pub error: Option<String>,
}

impl FileRecord {
    pub fn discovered(
        import_id: Uuid,
        source_key: &str,
        file_key: &str,
        dataset: &str,
        size_bytes: u64,
    ) -> FileRecord {
        FileRecord {
            import_id,
            file_key: file_key.to_string(),
            source_key: source_key.to_string(),
            dataset: dataset.to_string(),
            logical_date: None,
            status: FileProcessingStatus::Discovered,
            size_bytes,
            ciphertext_md5: None,
            plaintext_md5: None,
            acquisition: FileAcquisitionDetail::default(),
            ingestion: FileIngestionDetail::default(),
            error: None,
        }
    }

    pub fn doc_id(&self) -> String {
        file_record_doc_id(self.import_id, &self.file_key)
    }
}

pub fn file_record_doc_id(import_id: Uuid, file_key: &str) -> String {
    format!("{import_id}:{file_key}")
}
