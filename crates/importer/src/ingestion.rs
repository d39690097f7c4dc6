use crate::config::ImportConfig;
use crate::reporter::ImportReporter;
use crate::upsert::{Applied, RecordUpserter};
use crate::ImportError;
use blob_store::BlobStore;
use chrono::Utc;
use futures::StreamExt;
use models::{
    base_name, ChangeType, DataSetDefinition, DataSetRegistry, Document, FileProcessingStatus,
    FileRecord, PhaseProgress, PhaseStatus,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CANCELLED_MARKER: &str = "cancelled before completion";

/// Phase two: decrypt each acquired file from the internal store, parse
/// its pipe-delimited rows, and apply them to the dataset collection with
/// lineage. Rows within a file are sequential; files run on a bounded
/// worker pool (`ImportConfig::ingest_workers`, default 1).
pub struct IngestionPipeline {
    internal: Arc<dyn BlobStore>,
    registry: Arc<DataSetRegistry>,
    reporter: ImportReporter,
    upserter: RecordUpserter,
    config: ImportConfig,
}

impl IngestionPipeline {
    pub fn new(
        internal: Arc<dyn BlobStore>,
        registry: Arc<DataSetRegistry>,
        reporter: ImportReporter,
        upserter: RecordUpserter,
        config: ImportConfig,
    ) -> IngestionPipeline {
        IngestionPipeline {
            internal,
            registry,
            reporter,
            upserter,
            config,
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(import_id = %import_id))]
    pub async fn run(
        &self,
        import_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PhaseProgress, ImportError> {
        let shared = Arc::new(tokio::sync::Mutex::new(PhaseProgress::running(Utc::now())));
        self.persist_phase(import_id, &shared).await?;

        let acquired: Vec<FileRecord> = self
            .reporter
            .get_file_reports(import_id)
            .await?
            .into_iter()
            .filter(|record| record.status == FileProcessingStatus::Acquired)
            .collect();
        {
            let mut phase = shared.lock().await;
            phase.files_discovered = acquired.len() as u64;
        }
        self.persist_phase(import_id, &shared).await?;

        let workers = self.config.ingest_workers.max(1);
        futures::stream::iter(acquired)
            .map(|record| {
                let shared = shared.clone();
                async move {
                    if cancel.is_cancelled() {
                        let mut phase = shared.lock().await;
                        if phase.error.is_none() {
                            phase.error = Some(CANCELLED_MARKER.to_string());
                        }
                        return;
                    }
                    self.run_file(import_id, record, &shared).await;
                }
            })
            .buffer_unordered(workers)
            .collect::<Vec<()>>()
            .await;

        let phase = {
            let mut phase = shared.lock().await;
            phase.completed_at = Some(Utc::now());
            phase.current_file = None;
            phase.status = Some(if phase.files_failed == 0 && phase.error.is_none() {
                PhaseStatus::Completed
            } else {
                PhaseStatus::Failed
            });
            phase.clone()
        };
        self.reporter.update_ingestion_phase(import_id, &phase).await?;
        Ok(phase)
    }

    async fn persist_phase(
        &self,
        import_id: Uuid,
        shared: &Arc<tokio::sync::Mutex<PhaseProgress>>,
    ) -> Result<(), ImportError> {
        let snapshot = shared.lock().await.clone();
        self.reporter.update_ingestion_phase(import_id, &snapshot).await
    }

    /// One file end to end. Per-file failures are recorded and counted;
    /// they never unwind the phase.
    async fn run_file(
        &self,
        import_id: Uuid,
        mut record: FileRecord,
        shared: &Arc<tokio::sync::Mutex<PhaseProgress>>,
    ) {
        {
            let mut phase = shared.lock().await;
            phase.current_file = Some(record.file_key.clone());
        }
        let _ = self.persist_phase(import_id, shared).await;

        record.ingestion.started_at = Some(Utc::now());
        match self.ingest_file(import_id, &mut record, shared).await {
            Ok(()) => {
                record.status = FileProcessingStatus::Ingested;
                record.ingestion.completed_at = Some(Utc::now());
                let mut phase = shared.lock().await;
                phase.files_processed += 1;
            }
            Err(err) => {
                tracing::warn!(file = %record.file_key, %err, "file ingestion failed");
                record.status = FileProcessingStatus::Failed;
                record.error = Some(crate::error_chain(&err));
                record.ingestion.completed_at = Some(Utc::now());
                let mut phase = shared.lock().await;
                phase.files_failed += 1;
            }
        }
        let _ = self.reporter.upsert_file_report(&record).await;
        let _ = self.persist_phase(import_id, shared).await;
    }

    async fn ingest_file(
        &self,
        import_id: Uuid,
        record: &mut FileRecord,
        shared: &Arc<tokio::sync::Mutex<PhaseProgress>>,
    ) -> Result<(), ImportError> {
        let def = self
            .registry
            .get(&record.dataset)
            .ok_or_else(|| {
                doc_store::StoreError::Permanent(format!(
                    "no dataset definition named '{}'",
                    record.dataset
                ))
            })?
            .clone();
        let password = stream_crypto::derive_password(base_name(&record.source_key))?;

        // Decrypt to a local spool file; plaintext never lands in a store.
        let spool = tempfile::NamedTempFile::new().map_err(blob_store::StoreError::Io)?;
        let spool_path = spool.path().to_path_buf();
        {
            let mut ciphertext = self.internal.download(&record.file_key).await?;
            let mut plaintext = tokio::fs::File::create(&spool_path)
                .await
                .map_err(blob_store::StoreError::Io)?;
            stream_crypto::decrypt_stream(
                &mut ciphertext,
                &mut plaintext,
                &password,
                &self.config.crypto_salt,
                Some(record.size_bytes),
                |_| {},
            )
            .await?;
        }

        let (plaintext_md5, total_rows) = scan_plaintext(&spool_path).await?;
        record.plaintext_md5 = Some(plaintext_md5);
        record.ingestion.rows_total = total_rows;

        self.apply_rows(import_id, &def, record, &spool_path, shared).await
    }

    async fn apply_rows(
        &self,
        import_id: Uuid,
        def: &DataSetDefinition,
        record: &mut FileRecord,
        spool_path: &std::path::Path,
        shared: &Arc<tokio::sync::Mutex<PhaseProgress>>,
    ) -> Result<(), ImportError> {
        let file = std::fs::File::open(spool_path).map_err(blob_store::StoreError::Io)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'|')
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut rows = reader.records();
        let header = match rows.next() {
            Some(Ok(header)) => header,
            Some(Err(err)) => {
                return Err(doc_store::StoreError::Permanent(format!(
                    "unreadable header: {err}"
                ))
                .into())
            }
            None => {
                return Err(doc_store::StoreError::Permanent("file has no header".to_string()).into())
            }
        };
        let columns = HeaderMap::resolve(def, &header).map_err(doc_store::StoreError::Permanent)?;

        let started = Instant::now();
        let mut row_number = 0u64;
        for row in rows {
            row_number += 1;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    record.ingestion.push_row_error(row_number, err.to_string());
                    continue;
                }
            };
            if row.len() != header.len() {
                record.ingestion.push_row_error(
                    row_number,
                    format!("row has {} columns, header has {}", row.len(), header.len()),
                );
                continue;
            }

            match self.apply_row(import_id, def, record, &columns, &row).await? {
                RowOutcome::Applied(applied) => {
                    let mut phase = shared.lock().await;
                    phase.records_processed += 1;
                    match applied {
                        Applied::Created => {
                            record.ingestion.records_created += 1;
                            phase.records_created += 1;
                        }
                        Applied::Updated | Applied::Undeleted => {
                            record.ingestion.records_updated += 1;
                            phase.records_updated += 1;
                        }
                        Applied::Deleted => {
                            record.ingestion.records_deleted += 1;
                            phase.records_deleted += 1;
                        }
                        Applied::Unchanged => record.ingestion.records_unchanged += 1,
                        Applied::MissingSkipped => record.ingestion.rows_skipped += 1,
                        Applied::MissingTarget => unreachable!("handled as a row error"),
                    }
                }
                RowOutcome::RowError(detail) => {
                    record.ingestion.push_row_error(row_number, detail);
                }
            }

            if row_number % self.config.progress_row_interval.max(1) == 0 {
                self.report_row_progress(import_id, record, row_number, started, shared)
                    .await;
            }
        }
        Ok(())
    }

    async fn apply_row(
        &self,
        import_id: Uuid,
        def: &DataSetDefinition,
        record: &FileRecord,
        columns: &HeaderMap,
        row: &csv::StringRecord,
    ) -> Result<RowOutcome, ImportError> {
        let raw_change = &row[columns.change_type];
        let change = match ChangeType::parse(raw_change) {
            Ok(change) => change,
            Err(raw) => {
                return Ok(RowOutcome::RowError(format!(
                    "unknown change type '{raw}'"
                )))
            }
        };

        let mut key_parts = Vec::with_capacity(columns.primary_key.len());
        for &at in &columns.primary_key {
            let value = row[at].trim();
            if value.is_empty() {
                return Ok(RowOutcome::RowError("empty primary-key column".to_string()));
            }
            key_parts.push(value);
        }
        let record_id = key_parts.join(":");

        let accumulators: Document = columns
            .accumulators
            .iter()
            .map(|(name, at)| (name.clone(), json!(&row[*at])))
            .collect();

        let applied = self
            .upserter
            .apply(def, import_id, &record.file_key, change, &record_id, accumulators)
            .await
            .map_err(ImportError::from)?;
        if applied == Applied::MissingTarget {
            return Ok(RowOutcome::RowError(format!(
                "{} addresses a record that does not exist",
                change.as_letter(),
            )));
        }
        Ok(RowOutcome::Applied(applied))
    }

    async fn report_row_progress(
        &self,
        import_id: Uuid,
        record: &FileRecord,
        row_number: u64,
        started: Instant,
        shared: &Arc<tokio::sync::Mutex<PhaseProgress>>,
    ) {
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        let rows_per_minute = (row_number as f64 * 60.0 / elapsed) as u64;
        let remaining = record.ingestion.rows_total.saturating_sub(row_number);
        let estimated_seconds_remaining = (remaining as f64 * elapsed / row_number as f64) as u64;
        tracing::debug!(
            file = %record.file_key,
            row = row_number,
            total = record.ingestion.rows_total,
            rows_per_minute,
            estimated_seconds_remaining,
            "ingestion progress",
        );
        let _ = self.reporter.upsert_file_report(record).await;
        let _ = self.persist_phase(import_id, shared).await;
    }
}

enum RowOutcome {
    Applied(Applied),
    RowError(String),
}

/// Column positions resolved from a file header against the dataset
/// definition. Column names are case-sensitive.
struct HeaderMap {
    change_type: usize,
    primary_key: Vec<usize>,
    accumulators: Vec<(String, usize)>,
}

impl HeaderMap {
    fn resolve(def: &DataSetDefinition, header: &csv::StringRecord) -> Result<HeaderMap, String> {
        let positions: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(at, name)| (name, at))
            .collect();
        let find = |name: &str| {
            positions
                .get(name)
                .copied()
                .ok_or_else(|| format!("header is missing required column '{name}'"))
        };

        Ok(HeaderMap {
            change_type: find(&def.change_type_column)?,
            primary_key: def
                .primary_key_columns
                .iter()
                .map(|name| find(name))
                .collect::<Result<_, _>>()?,
            accumulators: def
                .accumulator_columns
                .iter()
                .map(|name| find(name).map(|at| (name.clone(), at)))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// One pass over the decrypted spool: its content hash and the count of
/// non-empty lines after the header.
async fn scan_plaintext(path: &std::path::Path) -> Result<(String, u64), ImportError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(blob_store::StoreError::Io)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; stream_crypto::BUFFER_LEN];
    let mut lines = 0u64;
    let mut line_has_content = false;
    loop {
        let n = file.read(&mut buf).await.map_err(blob_store::StoreError::Io)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        for &byte in &buf[..n] {
            if byte == b'\n' {
                if line_has_content {
                    lines += 1;
                }
                line_has_content = false;
            } else if !byte.is_ascii_whitespace() {
                line_has_content = true;
            }
        }
    }
    if line_has_content {
        lines += 1;
    }
    Ok((format!("{:x}", context.compute()), lines.saturating_sub(1)))
}
