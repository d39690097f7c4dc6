use crate::acquisition::AcquisitionPipeline;
use crate::config::ImportConfig;
use crate::ingestion::IngestionPipeline;
use crate::lineage::LineageWriter;
use crate::reporter::ImportReporter;
use crate::upsert::RecordUpserter;
use crate::ImportError;
use blob_store::BlobStore;
use chrono::Utc;
use doc_store::DocumentStore;
use models::{DataSetRegistry, ImportRun, ImportStatus, PhaseStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_CAP: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("import {0} did not finish within the polling cap")]
    Timeout(Uuid),
    #[error("import {0} does not exist")]
    NotFound(Uuid),
    #[error(transparent)]
    Import(#[from] ImportError),
}

/// Runs both phases of an import and owns the run's terminal status.
pub struct ImportOrchestrator {
    acquisition: AcquisitionPipeline,
    ingestion: IngestionPipeline,
    reporter: ImportReporter,
}

impl ImportOrchestrator {
    pub fn new(
        external: Arc<dyn BlobStore>,
        internal: Arc<dyn BlobStore>,
        store: Arc<dyn DocumentStore>,
        registry: Arc<DataSetRegistry>,
        config: ImportConfig,
    ) -> ImportOrchestrator {
        let reporter = ImportReporter::new(store.clone());
        let lineage = LineageWriter::new(store.clone());
        let upserter = RecordUpserter::new(store, lineage);
        ImportOrchestrator {
            acquisition: AcquisitionPipeline::new(
                external,
                internal.clone(),
                registry.clone(),
                reporter.clone(),
                config.clone(),
            ),
            ingestion: IngestionPipeline::new(internal, registry, reporter.clone(), upserter, config),
            reporter,
        }
    }

    pub fn reporter(&self) -> &ImportReporter {
        &self.reporter
    }

    /// Run an import to completion. Idempotent on `import_id`: starting an
    /// id that already reached a terminal status returns the prior result
    /// without doing any work.
    #[tracing::instrument(skip(self, cancel), fields(import_id = %import_id, source_type))]
    pub async fn start(
        &self,
        import_id: Uuid,
        source_type: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportRun, ImportError> {
        if let Some(existing) = self.reporter.get_import_report(import_id).await? {
            if existing.status.is_terminal() {
                tracing::info!(status = ?existing.status, "import already finished, nothing to do");
                return Ok(existing);
            }
        }

        let run = ImportRun::started(import_id, source_type, Utc::now());
        self.reporter.create_import(&run).await?;

        let acquisition = self.acquisition.run(import_id, cancel).await?;

        let ingestion = if cancel.is_cancelled() {
            tracing::warn!("import cancelled between phases");
            None
        } else {
            Some(self.ingestion.run(import_id, cancel).await?)
        };

        let both_completed = acquisition.status() == PhaseStatus::Completed
            && ingestion.as_ref().map(|p| p.status()) == Some(PhaseStatus::Completed);
        let status = if both_completed {
            ImportStatus::Completed
        } else {
            ImportStatus::Failed
        };
        let error = acquisition
            .error
            .clone()
            .or_else(|| ingestion.as_ref().and_then(|p| p.error.clone()));

        self.reporter.finish_import(import_id, status, error).await?;
        let run = self
            .reporter
            .get_import_report(import_id)
            .await?
            .expect("the run was just written");
        tracing::info!(status = ?run.status, "import finished");
        Ok(run)
    }

    /// Poll until the import reaches a terminal status: 1-second interval,
    /// 5-minute overall cap.
    pub async fn wait_for_completion(&self, import_id: Uuid) -> Result<ImportRun, WaitError> {
        let deadline = tokio::time::Instant::now() + POLL_CAP;
        loop {
            match self.reporter.get_import_report(import_id).await? {
                Some(run) if run.status.is_terminal() => return Ok(run),
                Some(_) => {}
                None => return Err(WaitError::NotFound(import_id)),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WaitError::Timeout(import_id));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
