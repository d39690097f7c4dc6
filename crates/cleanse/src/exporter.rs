use crate::config::CleanseConfig;
use crate::issue_store::IssueStore;
use crate::operations::OperationStore;
use crate::rules::{rule_description, rule_priority};
use crate::CleanseError;
use blob_store::BlobStore;
use chrono::Utc;
use models::Issue;
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;
use zip::write::FileOptions;

/// The report's fixed column order.
const REPORT_HEADER: [&str; 17] = [
    "CPH",
    "CTS LID Full Identifier",
    "Issue Code",
    "Rule Code",
    "Error Code",
    "Error Description",
    "Email (CTS)",
    "Email (SAM)",
    "Tel (CTS)",
    "Tel (SAM)",
    "FSA",
    "First Detected (UTC)",
    "Last Updated (UTC)",
    "Active",
    "Ignored",
    "Resolution Status",
    "Assigned To",
];

/// Serializes all active issues as CSV, zips the result into a single
/// archive entry, uploads it to the internal store, and stamps the object
/// key plus a presigned URL onto the operation document.
pub struct ReportExporter {
    internal: Arc<dyn BlobStore>,
    issues: IssueStore,
    operations: OperationStore,
    config: CleanseConfig,
}

impl ReportExporter {
    pub fn new(
        internal: Arc<dyn BlobStore>,
        issues: IssueStore,
        operations: OperationStore,
        config: CleanseConfig,
    ) -> ReportExporter {
        ReportExporter {
            internal,
            issues,
            operations,
            config,
        }
    }

    #[tracing::instrument(skip(self), fields(operation_id = %operation_id))]
    pub async fn export(&self, operation_id: Uuid) -> Result<(String, url::Url), CleanseError> {
        let issues = self.issues.active_issues().await?;
        let csv = render_csv(&issues)?;
        let archive = zip_single_entry(&format!("cleanse-report-{operation_id}.csv"), &csv)?;

        let key = format!(
            "{}/{}/cleanse-report-{operation_id}.zip",
            self.config.reports_prefix.trim_matches('/'),
            Utc::now().format("%Y/%m/%d"),
        );
        let mut reader = std::io::Cursor::new(archive);
        self.internal
            .upload(&key, &mut reader, "application/zip", &Default::default())
            .await?;
        let url = self
            .internal
            .presign_get(&key, self.config.report_url_ttl)
            .await?;

        self.operations
            .set_report(operation_id, key.clone(), url.to_string())
            .await?;
        tracing::info!(issues = issues.len(), %key, "report exported");
        Ok((key, url))
    }
}

fn render_csv(issues: &[Issue]) -> Result<Vec<u8>, CleanseError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(REPORT_HEADER)
        .map_err(|err| CleanseError::Report(err.to_string()))?;

    for issue in issues {
        let context = &issue.context;
        writer
            .write_record([
                context.cph.as_deref().unwrap_or(""),
                context.lid_full_identifier.as_deref().unwrap_or(""),
                issue.fingerprint.as_str(),
                issue.rule_id.as_str(),
                &rule_priority(&issue.rule_id).to_string(),
                &describe(issue),
                &context.cts_emails.join("; "),
                &context.sam_emails.join("; "),
                &context.cts_phones.join("; "),
                &context.sam_phones.join("; "),
                context.fsa.as_deref().unwrap_or(""),
                &issue.created_at.to_rfc3339(),
                &issue.last_updated_at.to_rfc3339(),
                bool_cell(issue.active),
                bool_cell(issue.ignored),
                if issue.active { "Active" } else { "Resolved" },
                "",
            ])
            .map_err(|err| CleanseError::Report(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| CleanseError::Report(err.to_string()))
}

fn describe(issue: &Issue) -> String {
    match &issue.context.detail {
        Some(detail) => format!("{}: {detail}", rule_description(&issue.rule_id)),
        None => rule_description(&issue.rule_id).to_string(),
    }
}

fn bool_cell(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn zip_single_entry(entry_name: &str, content: &[u8]) -> Result<Vec<u8>, CleanseError> {
    let report = |err: &dyn std::fmt::Display| CleanseError::Report(err.to_string());

    let mut archive = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    archive
        .start_file(entry_name, FileOptions::default())
        .map_err(|err| report(&err))?;
    archive.write_all(content).map_err(|err| report(&err))?;
    let cursor = archive.finish().map_err(|err| report(&err))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use models::IssueContext;

    fn issue(active: bool) -> Issue {
        Issue {
            fingerprint: "abc123".to_string(),
            rule_id: "SAM_MISSING_EMAIL_ADDRESS".to_string(),
            primary_record_id: "UK-12/345/6001".to_string(),
            context: IssueContext {
                cph: Some("12/345/6001".to_string()),
                lid_full_identifier: Some("UK-12/345/6001".to_string()),
                cts_emails: vec!["a@x.com".to_string(), "b@x.com".to_string()],
                sam_emails: vec!["a@x.com".to_string()],
                detail: Some("missing from SAM: b@x.com".to_string()),
                ..Default::default()
            },
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
            last_updated_at: Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap(),
            last_seen_operation_id: Uuid::nil(),
            active,
            ignored: false,
        }
    }

    #[test]
    fn csv_carries_the_fixed_header_and_joined_lists() {
        let csv = render_csv(&[issue(true)]).unwrap();
        let text = String::from_utf8(csv).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("CPH,CTS LID Full Identifier,Issue Code,Rule Code"));
        assert!(header.ends_with("Active,Ignored,Resolution Status,Assigned To"));

        let row = lines.next().unwrap();
        assert!(row.contains("12/345/6001"));
        assert!(row.contains("a@x.com; b@x.com"));
        assert!(row.contains("2025-01-01T08:00:00+00:00"));
        assert!(row.contains("Active"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn zip_wraps_a_single_entry() {
        let archive = zip_single_entry("report.csv", b"CPH\n12/345/6001\n").unwrap();
        let mut reader = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        assert_eq!(reader.len(), 1);
        let mut entry = reader.by_index(0).unwrap();
        assert_eq!(entry.name(), "report.csv");
        let mut content = String::new();
        std::io::Read::read_to_string(&mut entry, &mut content).unwrap();
        assert_eq!(content, "CPH\n12/345/6001\n");
    }
}
