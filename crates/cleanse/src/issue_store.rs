use crate::CleanseError;
use chrono::Utc;
use doc_store::{DocumentStore, Filter, QueryParameters, SortKey};
use models::fields::collections::{CLEANSE_ISSUES, CLEANSE_ISSUE_HISTORY};
use models::{
    from_document, issue_fingerprint, to_document, Issue, IssueContext, IssueHistory,
    IssueRecordResult,
};
use std::sync::Arc;
use uuid::Uuid;

/// One rule hit, ready to be recorded against the issue ledger.
#[derive(Clone, Debug)]
pub struct RecordIssueCommand {
    pub rule_id: String,
    pub primary_record_id: String,
    pub context: IssueContext,
}

/// Persistence of issues and their observation history. History rows are
/// keyed `(fingerprint, operation)`, so a retried observation overwrites
/// its own snapshot rather than duplicating it.
#[derive(Clone)]
pub struct IssueStore {
    store: Arc<dyn DocumentStore>,
}

impl IssueStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> IssueStore {
        IssueStore { store }
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<Issue>, CleanseError> {
        Ok(match self.store.get(CLEANSE_ISSUES, fingerprint).await? {
            Some(doc) => Some(from_document(&doc)?),
            None => None,
        })
    }

    pub async fn put(&self, issue: &Issue) -> Result<(), CleanseError> {
        self.store
            .upsert(CLEANSE_ISSUES, &issue.fingerprint, to_document(issue)?)
            .await?;
        Ok(())
    }

    pub async fn append_history(&self, history: &IssueHistory) -> Result<(), CleanseError> {
        self.store
            .upsert(CLEANSE_ISSUE_HISTORY, &history.doc_id(), to_document(history)?)
            .await?;
        Ok(())
    }

    /// All active issues, ordered by rule then record for stable exports.
    pub async fn active_issues(&self) -> Result<Vec<Issue>, CleanseError> {
        let params = QueryParameters::new(CLEANSE_ISSUES)
            .with_filter(Filter::eq("active", true))
            .with_sort(vec![
                SortKey::asc("rule_id"),
                SortKey::asc("primary_record_id"),
            ]);
        let result = self.store.query(&params).await?;
        result
            .data
            .iter()
            .map(|doc| from_document(doc).map_err(CleanseError::from))
            .collect()
    }

    /// Active issues whose last observation predates `operation_id`.
    pub async fn stale_issues(&self, operation_id: Uuid) -> Result<Vec<Issue>, CleanseError> {
        let stale = Filter::and([
            Filter::eq("active", true),
            Filter::ne("last_seen_operation_id", operation_id.to_string()),
        ]);
        let params = QueryParameters::new(CLEANSE_ISSUES).with_filter(stale);
        let result = self.store.query(&params).await?;
        result
            .data
            .iter()
            .map(|doc| from_document(doc).map_err(CleanseError::from))
            .collect()
    }

    pub async fn history_count(&self, fingerprint: &str) -> Result<u64, CleanseError> {
        Ok(self
            .store
            .count(CLEANSE_ISSUE_HISTORY, &Filter::eq("fingerprint", fingerprint))
            .await?)
    }
}

/// Issue semantics over the store: idempotent recording keyed by stable
/// fingerprint, and stale deactivation at the end of an operation.
#[derive(Clone)]
pub struct IssueCommandService {
    issues: IssueStore,
}

impl IssueCommandService {
    pub fn new(issues: IssueStore) -> IssueCommandService {
        IssueCommandService { issues }
    }

    pub fn store(&self) -> &IssueStore {
        &self.issues
    }

    /// Record one observation. Unknown fingerprints insert; inactive ones
    /// reactivate; active ones update when the context changed, otherwise
    /// only the last-seen operation moves.
    pub async fn record_issue(
        &self,
        cmd: RecordIssueCommand,
        operation_id: Uuid,
    ) -> Result<IssueRecordResult, CleanseError> {
        let fingerprint = issue_fingerprint(&cmd.primary_record_id, &cmd.rule_id);
        let now = Utc::now();

        let (issue, result) = match self.issues.get(&fingerprint).await? {
            None => {
                let issue = Issue {
                    fingerprint: fingerprint.clone(),
                    rule_id: cmd.rule_id.clone(),
                    primary_record_id: cmd.primary_record_id.clone(),
                    context: cmd.context.clone(),
                    created_at: now,
                    last_updated_at: now,
                    last_seen_operation_id: operation_id,
                    active: true,
                    ignored: false,
                };
                (issue, IssueRecordResult::Created)
            }
            Some(mut issue) if !issue.active => {
                issue.active = true;
                issue.context = cmd.context.clone();
                issue.last_updated_at = now;
                issue.last_seen_operation_id = operation_id;
                (issue, IssueRecordResult::Reactivated)
            }
            Some(mut issue) if issue.context != cmd.context => {
                issue.context = cmd.context.clone();
                issue.last_updated_at = now;
                issue.last_seen_operation_id = operation_id;
                (issue, IssueRecordResult::Updated)
            }
            Some(mut issue) => {
                issue.last_seen_operation_id = operation_id;
                (issue, IssueRecordResult::Unchanged)
            }
        };

        self.issues.put(&issue).await?;
        self.issues
            .append_history(&IssueHistory {
                fingerprint,
                operation_id,
                rule_id: cmd.rule_id,
                context: cmd.context,
                observed_at: now,
            })
            .await?;

        tracing::debug!(
            rule = %issue.rule_id,
            record = %issue.primary_record_id,
            ?result,
            "issue recorded",
        );
        Ok(result)
    }

    /// Deactivate every active issue the given operation did not observe.
    /// Returns how many were deactivated; callers fold this into the
    /// operation's resolved count.
    pub async fn deactivate_stale_issues(&self, operation_id: Uuid) -> Result<u64, CleanseError> {
        let mut count = 0u64;
        for mut issue in self.issues.stale_issues(operation_id).await? {
            issue.active = false;
            issue.last_updated_at = Utc::now();
            self.issues.put(&issue).await?;
            count += 1;
        }
        if count > 0 {
            tracing::info!(count, %operation_id, "deactivated stale issues");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use doc_store::MemoryStore;

    fn service() -> IssueCommandService {
        IssueCommandService::new(IssueStore::new(Arc::new(MemoryStore::new())))
    }

    fn cmd(record: &str, rule: &str, detail: &str) -> RecordIssueCommand {
        RecordIssueCommand {
            rule_id: rule.to_string(),
            primary_record_id: record.to_string(),
            context: IssueContext {
                cph: Some(record.to_string()),
                detail: Some(detail.to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn identical_observations_are_created_then_unchanged() {
        let issues = service();
        let op = Uuid::new_v4();
        let command = cmd("12/345/6001", "CTS_CPH_NOT_IN_SAM", "d");

        assert_eq!(
            issues.record_issue(command.clone(), op).await.unwrap(),
            IssueRecordResult::Created,
        );
        assert_eq!(
            issues.record_issue(command.clone(), op).await.unwrap(),
            IssueRecordResult::Unchanged,
        );

        let fingerprint = issue_fingerprint("12/345/6001", "CTS_CPH_NOT_IN_SAM");
        assert_eq!(issues.store().active_issues().await.unwrap().len(), 1);
        assert_eq!(issues.store().history_count(&fingerprint).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changed_context_updates_and_new_operation_appends_history() {
        let issues = service();
        let op1 = Uuid::new_v4();
        let op2 = Uuid::new_v4();
        let fingerprint = issue_fingerprint("12/345/6001", "SAM_MISSING_EMAIL_ADDRESS");

        issues
            .record_issue(cmd("12/345/6001", "SAM_MISSING_EMAIL_ADDRESS", "a"), op1)
            .await
            .unwrap();
        assert_eq!(
            issues
                .record_issue(cmd("12/345/6001", "SAM_MISSING_EMAIL_ADDRESS", "b"), op2)
                .await
                .unwrap(),
            IssueRecordResult::Updated,
        );
        assert_eq!(issues.store().history_count(&fingerprint).await.unwrap(), 2);

        let issue = issues.store().get(&fingerprint).await.unwrap().unwrap();
        assert_eq!(issue.last_seen_operation_id, op2);
        assert_eq!(issue.context.detail.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn deactivation_reactivation_cycle() {
        let issues = service();
        let op1 = Uuid::new_v4();
        issues
            .record_issue(cmd("12/345/6001", "CTS_CPH_NOT_IN_SAM", "d"), op1)
            .await
            .unwrap();
        issues
            .record_issue(cmd("12/345/6002", "CTS_CPH_NOT_IN_SAM", "d"), op1)
            .await
            .unwrap();

        // A second operation only sees the first record.
        let op2 = Uuid::new_v4();
        issues
            .record_issue(cmd("12/345/6001", "CTS_CPH_NOT_IN_SAM", "d"), op2)
            .await
            .unwrap();
        let resolved = issues.deactivate_stale_issues(op2).await.unwrap();
        assert_eq!(resolved, 1);

        let active = issues.store().active_issues().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active
            .iter()
            .all(|issue| issue.last_seen_operation_id == op2));

        // The third operation sees the second record again.
        let op3 = Uuid::new_v4();
        assert_eq!(
            issues
                .record_issue(cmd("12/345/6002", "CTS_CPH_NOT_IN_SAM", "d"), op3)
                .await
                .unwrap(),
            IssueRecordResult::Reactivated,
        );
    }

    #[tokio::test]
    async fn deactivation_with_nothing_stale_is_zero() {
        let issues = service();
        let op = Uuid::new_v4();
        issues
            .record_issue(cmd("12/345/6001", "CTS_CPH_NOT_IN_SAM", "d"), op)
            .await
            .unwrap();
        assert_eq!(issues.deactivate_stale_issues(op).await.unwrap(), 0);
    }
}
