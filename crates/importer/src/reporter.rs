use crate::ImportError;
use chrono::Utc;
use doc_store::{DocumentStore, Filter, QueryParameters, SortKey};
use models::fields::collections::{FILE_REPORTS, IMPORTS};
use models::{
    from_document, to_document, FileRecord, ImportRun, ImportStatus, PhaseKind, PhaseProgress,
};
use std::sync::Arc;
use uuid::Uuid;

/// Progress and report store for imports. All writes are single-document
/// updates; within one import the pipelines are the only writers, so
/// readers observe monotonic counter progression.
#[derive(Clone)]
pub struct ImportReporter {
    store: Arc<dyn DocumentStore>,
}

impl ImportReporter {
    pub fn new(store: Arc<dyn DocumentStore>) -> ImportReporter {
        ImportReporter { store }
    }

    pub async fn create_import(&self, run: &ImportRun) -> Result<(), ImportError> {
        let doc = to_document(run)?;
        self.store.upsert(IMPORTS, &run.doc_id(), doc).await?;
        Ok(())
    }

    pub async fn get_import_report(
        &self,
        import_id: Uuid,
    ) -> Result<Option<ImportRun>, ImportError> {
        let doc = self.store.get(IMPORTS, &import_id.to_string()).await?;
        Ok(match doc {
            Some(doc) => Some(from_document(&doc)?),
            None => None,
        })
    }

    /// Most recent imports first.
    pub async fn list_imports(&self, skip: usize, top: usize) -> Result<Vec<ImportRun>, ImportError> {
        let params = QueryParameters::new(IMPORTS)
            .with_sort(vec![SortKey::desc("started_at")])
            .paged(skip, top);
        let result = self.store.query(&params).await?;
        result
            .data
            .iter()
            .map(|doc| from_document(doc).map_err(ImportError::from))
            .collect()
    }

    pub async fn get_file_reports(&self, import_id: Uuid) -> Result<Vec<FileRecord>, ImportError> {
        let params = QueryParameters::new(FILE_REPORTS)
            .with_filter(Filter::eq("import_id", import_id.to_string()))
            .with_sort(vec![SortKey::asc("file_key")]);
        let result = self.store.query(&params).await?;
        result
            .data
            .iter()
            .map(|doc| from_document(doc).map_err(ImportError::from))
            .collect()
    }

    pub async fn update_acquisition_phase(
        &self,
        import_id: Uuid,
        phase: &PhaseProgress,
    ) -> Result<(), ImportError> {
        self.update_phase(import_id, PhaseKind::Acquisition, phase).await
    }

    pub async fn update_ingestion_phase(
        &self,
        import_id: Uuid,
        phase: &PhaseProgress,
    ) -> Result<(), ImportError> {
        self.update_phase(import_id, PhaseKind::Ingestion, phase).await
    }

    async fn update_phase(
        &self,
        import_id: Uuid,
        kind: PhaseKind,
        phase: &PhaseProgress,
    ) -> Result<(), ImportError> {
        let mut run = self
            .get_import_report(import_id)
            .await?
            .ok_or_else(|| doc_store::StoreError::NotFound {
                collection: IMPORTS.to_string(),
                id: import_id.to_string(),
            })?;
        match kind {
            PhaseKind::Acquisition => run.acquisition = phase.clone(),
            PhaseKind::Ingestion => run.ingestion = phase.clone(),
        }
        let doc = to_document(&run)?;
        self.store.upsert(IMPORTS, &run.doc_id(), doc).await?;
        Ok(())
    }

    /// Stamp the run's terminal status from its phase outcomes.
    pub async fn finish_import(
        &self,
        import_id: Uuid,
        status: ImportStatus,
        error: Option<String>,
    ) -> Result<(), ImportError> {
        let mut run = self
            .get_import_report(import_id)
            .await?
            .ok_or_else(|| doc_store::StoreError::NotFound {
                collection: IMPORTS.to_string(),
                id: import_id.to_string(),
            })?;
        run.status = status;
        run.completed_at = Some(Utc::now());
        run.error = error;
        let doc = to_document(&run)?;
        self.store.upsert(IMPORTS, &run.doc_id(), doc).await?;
        Ok(())
    }

    pub async fn upsert_file_report(&self, record: &FileRecord) -> Result<(), ImportError> {
        let doc = to_document(record)?;
        self.store.upsert(FILE_REPORTS, &record.doc_id(), doc).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use doc_store::MemoryStore;
    use models::FileProcessingStatus;

    fn reporter() -> ImportReporter {
        ImportReporter::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn import_reports_round_trip() {
        let reporter = reporter();
        let id = Uuid::new_v4();
        let run = ImportRun::started(id, "external", Utc::now());
        reporter.create_import(&run).await.unwrap();

        let read = reporter.get_import_report(id).await.unwrap().unwrap();
        assert_eq!(read.import_id, id);
        assert_eq!(read.status, ImportStatus::Started);
        assert!(reporter
            .get_import_report(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn phase_updates_land_on_the_right_phase() {
        let reporter = reporter();
        let id = Uuid::new_v4();
        reporter
            .create_import(&ImportRun::started(id, "external", Utc::now()))
            .await
            .unwrap();

        let mut phase = PhaseProgress::running(Utc::now());
        phase.files_discovered = 3;
        reporter.update_acquisition_phase(id, &phase).await.unwrap();

        let run = reporter.get_import_report(id).await.unwrap().unwrap();
        assert_eq!(run.acquisition.files_discovered, 3);
        assert_eq!(run.ingestion.files_discovered, 0);
    }

    #[tokio::test]
    async fn file_reports_filter_by_import_and_sort_by_key() {
        let reporter = reporter();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        for (import, key) in [(id, "b.enc"), (id, "a.enc"), (other, "c.enc")] {
            let mut record = FileRecord::discovered(import, key, key, "sam", 10);
            record.status = FileProcessingStatus::Acquired;
            reporter.upsert_file_report(&record).await.unwrap();
        }

        let records = reporter.get_file_reports(id).await.unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.file_key.as_str()).collect();
        assert_eq!(keys, vec!["a.enc", "b.enc"]);
    }

    #[tokio::test]
    async fn list_imports_is_most_recent_first() {
        let reporter = reporter();
        let old = Utc::now() - chrono::Duration::hours(2);
        let new = Utc::now();
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        reporter
            .create_import(&ImportRun::started(old_id, "external", old))
            .await
            .unwrap();
        reporter
            .create_import(&ImportRun::started(new_id, "external", new))
            .await
            .unwrap();

        let listed = reporter.list_imports(0, 10).await.unwrap();
        assert_eq!(listed[0].import_id, new_id);
        assert_eq!(listed[1].import_id, old_id);

        let paged = reporter.list_imports(1, 10).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].import_id, old_id);
    }
}
