use crate::CleanseError;
use chrono::Utc;
use doc_store::{DocumentStore, QueryParameters, SortKey};
use models::fields::collections::CLEANSE_OPERATIONS;
use models::{from_document, to_document, CleanseOperation, OperationStatus};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence of cleanse operation documents: status, progress and the
/// exported report's location.
#[derive(Clone)]
pub struct OperationStore {
    store: Arc<dyn DocumentStore>,
}

impl OperationStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> OperationStore {
        OperationStore { store }
    }

    pub async fn create_running(&self, operation_id: Uuid) -> Result<CleanseOperation, CleanseError> {
        let mut operation = CleanseOperation::new(operation_id);
        operation.status = OperationStatus::Running;
        operation.status_text = "Starting analysis".to_string();
        operation.started_at = Some(Utc::now());
        self.put(&operation).await?;
        Ok(operation)
    }

    pub async fn get(&self, operation_id: Uuid) -> Result<Option<CleanseOperation>, CleanseError> {
        Ok(
            match self
                .store
                .get(CLEANSE_OPERATIONS, &operation_id.to_string())
                .await?
            {
                Some(doc) => Some(from_document(&doc)?),
                None => None,
            },
        )
    }

    /// Most recent operations first.
    pub async fn list(
        &self,
        skip: usize,
        top: usize,
    ) -> Result<Vec<CleanseOperation>, CleanseError> {
        let params = QueryParameters::new(CLEANSE_OPERATIONS)
            .with_sort(vec![SortKey::desc("started_at")])
            .paged(skip, top);
        let result = self.store.query(&params).await?;
        result
            .data
            .iter()
            .map(|doc| from_document(doc).map_err(CleanseError::from))
            .collect()
    }

    pub async fn set_progress(
        &self,
        operation_id: Uuid,
        records_analyzed: u64,
        total_records: u64,
        issues_found: u64,
    ) -> Result<(), CleanseError> {
        let mut operation = self.require(operation_id).await?;
        operation.records_analyzed = records_analyzed;
        operation.total_records = total_records;
        operation.issues_found = issues_found;
        operation.progress_percent = if total_records == 0 {
            0
        } else {
            ((records_analyzed.min(total_records) * 100) / total_records) as u8
        };
        operation.status_text =
            format!("Analyzed {records_analyzed} of {total_records} holdings");
        self.put(&operation).await
    }

    pub async fn complete(
        &self,
        operation_id: Uuid,
        issues_resolved: u64,
        duration_ms: u64,
    ) -> Result<(), CleanseError> {
        let mut operation = self.require(operation_id).await?;
        operation.status = OperationStatus::Completed;
        operation.progress_percent = 100;
        operation.status_text = format!(
            "Completed: {} issues found, {issues_resolved} resolved",
            operation.issues_found,
        );
        operation.issues_resolved = issues_resolved;
        operation.completed_at = Some(Utc::now());
        operation.duration_ms = Some(duration_ms);
        self.put(&operation).await
    }

    pub async fn fail(
        &self,
        operation_id: Uuid,
        error: String,
        duration_ms: u64,
    ) -> Result<(), CleanseError> {
        let mut operation = self.require(operation_id).await?;
        operation.status = OperationStatus::Failed;
        operation.status_text = "Failed".to_string();
        operation.error = Some(error);
        operation.completed_at = Some(Utc::now());
        operation.duration_ms = Some(duration_ms);
        self.put(&operation).await
    }

    pub async fn cancel(&self, operation_id: Uuid, duration_ms: u64) -> Result<(), CleanseError> {
        let mut operation = self.require(operation_id).await?;
        operation.status = OperationStatus::Cancelled;
        operation.status_text = "Cancelled".to_string();
        operation.completed_at = Some(Utc::now());
        operation.duration_ms = Some(duration_ms);
        self.put(&operation).await
    }

    pub async fn set_report(
        &self,
        operation_id: Uuid,
        report_key: String,
        report_url: String,
    ) -> Result<(), CleanseError> {
        let mut operation = self.require(operation_id).await?;
        operation.report_key = Some(report_key);
        operation.report_url = Some(report_url);
        self.put(&operation).await
    }

    async fn require(&self, operation_id: Uuid) -> Result<CleanseOperation, CleanseError> {
        self.get(operation_id).await?.ok_or_else(|| {
            CleanseError::Store(doc_store::StoreError::NotFound {
                collection: CLEANSE_OPERATIONS.to_string(),
                id: operation_id.to_string(),
            })
        })
    }

    async fn put(&self, operation: &CleanseOperation) -> Result<(), CleanseError> {
        self.store
            .upsert(CLEANSE_OPERATIONS, &operation.doc_id(), to_document(operation)?)
            .await?;
        Ok(())
    }
}
