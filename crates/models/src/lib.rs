mod cph;
mod dataset;
mod document;
pub mod fields;
mod import;
mod issue;
mod lineage;
mod operation;
mod status;
mod views;

pub use cph::{Cph, Lid, ParseCphError, CTS_COUNTY_RANGE};
pub use dataset::{base_name, ConfigError, DataSetDefinition, DataSetRegistry, MatchedFile};
pub use document::{from_document, list_field, opt_str_field, str_field, to_document, Document};
pub use lineage::{LineageEvent, LineageEventType};
pub use import::{
    file_record_doc_id, FileAcquisitionDetail, FileIngestionDetail, FileRecord, ImportRun,
    PhaseKind, PhaseProgress, RowError, MAX_ROW_ERRORS,
};
pub use issue::{issue_fingerprint, Issue, IssueContext, IssueHistory};
pub use operation::CleanseOperation;
pub use status::{
    ChangeType, FileProcessingStatus, ImportStatus, IssueRecordResult, OperationStatus,
    PhaseStatus,
};
pub use views::{CtsCphHoldingView, SamCphHoldingView};
