//! Every document field-name constant in one place. Datasets are
//! schema-light maps, so consumers address fields through these rather
//! than scattering string literals.

/// CTS CPH-holding columns.
pub const LID_FULL_IDENTIFIER: &str = "LID_FULL_IDENTIFIER";
pub const ADR_NAME: &str = "ADR_NAME";
pub const ADR_EMAIL_ADDRESS: &str = "ADR_EMAIL_ADDRESS";
pub const ADR_TELEPHONE_NUMBER: &str = "ADR_TELEPHONE_NUMBER";

/// SAM CPH-holding columns.
pub const CPH: &str = "CPH";
pub const ANIMAL_SPECIES_CODE: &str = "ANIMAL_SPECIES_CODE";
pub const FEATURE_NAME: &str = "FEATURE_NAME";
pub const EMAIL_ADDRESS: &str = "EMAIL_ADDRESS";
pub const TELEPHONE_NUMBER: &str = "TELEPHONE_NUMBER";
pub const FSA: &str = "FSA";

/// SAM species code for cattle units.
pub const SPECIES_CATTLE: &str = "CTT";

/// Record-metadata columns stamped by ingestion, never sourced from rows.
pub const IS_DELETED: &str = "IsDeleted";
pub const CREATED_AT_UTC: &str = "CreatedAtUtc";
pub const UPDATED_AT_UTC: &str = "UpdatedAtUtc";
pub const BATCH_ID: &str = "BatchId";

/// Default name of the change-type column in source files.
pub const CHANGE_TYPE: &str = "CHANGETYPE";

/// User-metadata keys stamped on ciphertext copies in the internal store.
pub mod metadata {
    pub const MD5: &str = "x-kd-md5";
    pub const DATASET: &str = "x-kd-dataset";
    pub const IMPORT_ID: &str = "x-kd-import-id";
}

/// Document-store collections owned by the import and cleanse subsystems.
/// Dataset collections are named by their `DataSetDefinition.name`.
pub mod collections {
    pub const IMPORTS: &str = "imports";
    pub const FILE_REPORTS: &str = "file_reports";
    pub const CLEANSE_OPERATIONS: &str = "cleanse_operations";
    pub const CLEANSE_ISSUES: &str = "cleanse_issues";
    pub const CLEANSE_ISSUE_HISTORY: &str = "cleanse_issue_history";
    pub const DISTRIBUTED_LOCKS: &str = "distributed_locks";
}
