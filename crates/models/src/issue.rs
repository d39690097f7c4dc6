use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of an issue across runs: the same primary record
/// tripping the same rule always lands on the same fingerprint.
pub fn issue_fingerprint(primary_record_id: &str, rule_id: &str) -> String {
    format!("{:x}", md5::compute(format!("{primary_record_id}:{rule_id}")))
}

/// Everything a rule observed about the holding pair when it fired.
/// Context equality decides Updated vs Unchanged on re-observation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueContext {
    pub cph: Option<String>,
    pub lid_full_identifier: Option<String>,
    pub cts_emails: Vec<String>,
    pub sam_emails: Vec<String>,
    pub cts_phones: Vec<String>,
    pub sam_phones: Vec<String>,
    pub cts_location_name: Option<String>,
    pub sam_location_name: Option<String>,
    pub fsa: Option<String>,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Issue {
    /// `issue_fingerprint(primary_record_id, rule_id)`; the document id.
    pub fingerprint: String,
    pub rule_id: String,
    pub primary_record_id: String,
    pub context: IssueContext,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_seen_operation_id: Uuid,
    pub active: bool,
    /// Operator-set; ignored issues are exported but never auto-deactivated.
    pub ignored: bool,
}

/// Append-only snapshot of an issue as observed by one operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueHistory {
    pub fingerprint: String,
    pub operation_id: Uuid,
    pub rule_id: String,
    pub context: IssueContext,
    pub observed_at: DateTime<Utc>,
}

impl IssueHistory {
    /// History rows are idempotent per (fingerprint, operation): retries of
    /// the same observation overwrite rather than duplicate.
    pub fn doc_id(&self) -> String {
        format!("{}:{}", self.fingerprint, self.operation_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let a = issue_fingerprint("12/345/6001", "CTS_CPH_NOT_IN_SAM");
        let b = issue_fingerprint("12/345/6001", "CTS_CPH_NOT_IN_SAM");
        let c = issue_fingerprint("12/345/6002", "CTS_CPH_NOT_IN_SAM");
        let d = issue_fingerprint("12/345/6001", "SAM_CPH_NOT_IN_CTS");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 32);
    }
}
