use serde::{Deserialize, Serialize};

/// Terminal and non-terminal states of a whole import run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportStatus {
    Started,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Completed | ImportStatus::Failed)
    }
}

/// States of one phase (acquisition or ingestion) within an import.
/// Transitions are forward-only: Pending -> Running -> Completed | Failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileProcessingStatus {
    Discovered,
    Acquired,
    Ingested,
    Skipped,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of recording a single issue observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueRecordResult {
    Created,
    Reactivated,
    Updated,
    Unchanged,
    Resolved,
}

/// Per-row change marker carried in the source CSV's change-type column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
    Reactivate,
}

impl ChangeType {
    /// Parse the single-letter wire form. Unknown letters are a per-row
    /// error for the caller, so this returns the raw value for reporting.
    pub fn parse(raw: &str) -> Result<ChangeType, String> {
        match raw.trim() {
            "I" => Ok(ChangeType::Insert),
            "U" => Ok(ChangeType::Update),
            "D" => Ok(ChangeType::Delete),
            "R" => Ok(ChangeType::Reactivate),
            other => Err(other.to_string()),
        }
    }

    pub fn as_letter(&self) -> &'static str {
        match self {
            ChangeType::Insert => "I",
            ChangeType::Update => "U",
            ChangeType::Delete => "D",
            ChangeType::Reactivate => "R",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_letter())
    }
}
