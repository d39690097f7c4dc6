use crate::config::ImportConfig;
use crate::reporter::ImportReporter;
use crate::retry::with_retries;
use crate::ImportError;
use blob_store::{BlobStore, UserMetadata};
use chrono::Utc;
use models::fields::metadata;
use models::{
    base_name, DataSetRegistry, FileProcessingStatus, FileRecord, PhaseProgress, PhaseStatus,
};
use std::sync::Arc;
use std::time::Instant;
use stream_crypto::CiphertextTail;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CANCELLED_MARKER: &str = "cancelled before completion";

/// Phase one: discover encrypted drops in the external store, copy each
/// into the internal store with its ciphertext verified, and record a
/// file report per file. Files are processed one at a time, in the
/// lexicographic order the listing returns.
pub struct AcquisitionPipeline {
    external: Arc<dyn BlobStore>,
    internal: Arc<dyn BlobStore>,
    registry: Arc<DataSetRegistry>,
    reporter: ImportReporter,
    config: ImportConfig,
}

struct Discovered {
    source_key: String,
    file_key: String,
    dataset: String,
    logical_date: chrono::NaiveDate,
    size: u64,
}

impl AcquisitionPipeline {
    pub fn new(
        external: Arc<dyn BlobStore>,
        internal: Arc<dyn BlobStore>,
        registry: Arc<DataSetRegistry>,
        reporter: ImportReporter,
        config: ImportConfig,
    ) -> AcquisitionPipeline {
        AcquisitionPipeline {
            external,
            internal,
            registry,
            reporter,
            config,
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(import_id = %import_id))]
    pub async fn run(
        &self,
        import_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PhaseProgress, ImportError> {
        let mut phase = PhaseProgress::running(Utc::now());
        self.reporter
            .update_acquisition_phase(import_id, &phase)
            .await?;

        let result = self.run_inner(import_id, cancel, &mut phase).await;

        phase.completed_at = Some(Utc::now());
        phase.current_file = None;
        phase.status = Some(match &result {
            Ok(()) if phase.files_failed == 0 && phase.error.is_none() => PhaseStatus::Completed,
            Ok(()) => PhaseStatus::Failed,
            Err(err) => {
                phase.error = Some(crate::error_chain(err));
                PhaseStatus::Failed
            }
        });
        self.reporter
            .update_acquisition_phase(import_id, &phase)
            .await?;
        result.map(|()| phase)
    }

    async fn run_inner(
        &self,
        import_id: Uuid,
        cancel: &CancellationToken,
        phase: &mut PhaseProgress,
    ) -> Result<(), ImportError> {
        let discovered = self.discover(phase).await?;
        self.reporter
            .update_acquisition_phase(import_id, phase)
            .await?;

        for file in discovered {
            if cancel.is_cancelled() {
                tracing::warn!(source_key = %file.source_key, "acquisition cancelled");
                phase.error = Some(CANCELLED_MARKER.to_string());
                return Ok(());
            }
            phase.current_file = Some(file.file_key.clone());

            let mut record = FileRecord::discovered(
                import_id,
                &file.source_key,
                &file.file_key,
                &file.dataset,
                file.size,
            );
            record.logical_date = Some(file.logical_date);
            self.reporter.upsert_file_report(&record).await?;

            match self.acquire_file(import_id, &file, &mut record).await {
                Ok(FileProcessingStatus::Skipped) => phase.files_skipped += 1,
                Ok(_) => phase.files_processed += 1,
                Err(err) => {
                    tracing::warn!(source_key = %file.source_key, %err, "file acquisition failed");
                    record.status = FileProcessingStatus::Failed;
                    record.error = Some(crate::error_chain(&err));
                    phase.files_failed += 1;
                }
            }
            self.reporter.upsert_file_report(&record).await?;
            self.reporter
                .update_acquisition_phase(import_id, phase)
                .await?;
        }
        Ok(())
    }

    /// Enumerate the external store and match keys to datasets. Unmatched
    /// keys count as skipped, never as failures.
    async fn discover(&self, phase: &mut PhaseProgress) -> Result<Vec<Discovered>, ImportError> {
        let mut matched = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = with_retries(
                "list external store",
                self.config.max_transient_retries,
                |err: &blob_store::StoreError| err.is_transient(),
                || {
                    self.external.list(
                        &self.config.source_external_prefix,
                        self.config.list_page_size,
                        token.as_deref(),
                    )
                },
            )
            .await?;

            for item in &page.items {
                phase.files_discovered += 1;
                match self.registry.match_key(&item.key) {
                    Some((def, matched_file)) => matched.push(Discovered {
                        source_key: item.key.clone(),
                        file_key: self.internal_key(&item.key),
                        dataset: def.name.clone(),
                        logical_date: matched_file.logical_date,
                        size: item.size,
                    }),
                    None => {
                        tracing::debug!(key = %item.key, "no dataset matches, skipping");
                        phase.files_skipped += 1;
                    }
                }
            }
            if !page.is_truncated {
                return Ok(matched);
            }
            token = page.next_token;
        }
    }

    /// The internal copy keeps the same key path, re-rooted under the
    /// target prefix.
    fn internal_key(&self, source_key: &str) -> String {
        let rel = source_key
            .strip_prefix(&self.config.source_external_prefix)
            .unwrap_or(source_key)
            .trim_start_matches('/');
        match blob_store::normalize_prefix(&self.config.target_internal_prefix) {
            Some(prefix) => format!("{prefix}/{rel}"),
            None => rel.to_string(),
        }
    }

    async fn acquire_file(
        &self,
        import_id: Uuid,
        file: &Discovered,
        record: &mut FileRecord,
    ) -> Result<FileProcessingStatus, ImportError> {
        let password = stream_crypto::derive_password(base_name(&file.source_key))?;

        if self.config.skip_unchanged {
            if let Some(existing_md5) = self.existing_md5(&file.file_key, file.size).await? {
                let (md5, _) = self.hash_source(&file.source_key).await?;
                if md5 == existing_md5 {
                    tracing::info!(key = %file.file_key, "ciphertext unchanged, skipping");
                    record.status = FileProcessingStatus::Skipped;
                    record.ciphertext_md5 = Some(md5);
                    record.acquisition.skipped_unchanged = true;
                    record.acquisition.acquired_at = Some(Utc::now());
                    return Ok(FileProcessingStatus::Skipped);
                }
            }
        }

        // Single pass: hash the ciphertext and capture its trailing blocks
        // while streaming it into the internal store.
        let mut reader = self.external.download(&file.source_key).await?;
        let mut writer = self
            .internal
            .open_write(&file.file_key, "application/octet-stream", &UserMetadata::new())
            .await?;

        let mut context = md5::Context::new();
        let mut tail = CiphertextTail::new();
        let mut buf = vec![0u8; stream_crypto::BUFFER_LEN];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(blob_store::StoreError::Io)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
            tail.update(&buf[..n]);
            writer
                .write_all(&buf[..n])
                .await
                .map_err(blob_store::StoreError::Io)?;
        }
        writer
            .shutdown()
            .await
            .map_err(blob_store::StoreError::Io)?;
        let md5 = format!("{:x}", context.compute());

        // Validate the derived password against the final block's padding;
        // plaintext is never materialized during acquisition.
        let check_started = Instant::now();
        tail.validate(&password, &self.config.crypto_salt)?;
        let decryption_check_ms = check_started.elapsed().as_millis() as u64;

        let user_metadata: UserMetadata = [
            (metadata::MD5.to_string(), md5.clone()),
            (metadata::DATASET.to_string(), file.dataset.clone()),
            (metadata::IMPORT_ID.to_string(), import_id.to_string()),
        ]
        .into_iter()
        .collect();
        self.internal
            .set_metadata(&file.file_key, &user_metadata)
            .await?;

        record.status = FileProcessingStatus::Acquired;
        record.size_bytes = tail.total_bytes();
        record.ciphertext_md5 = Some(md5);
        record.acquisition.acquired_at = Some(Utc::now());
        record.acquisition.decryption_check_ms = decryption_check_ms;
        tracing::info!(key = %file.file_key, size = record.size_bytes, "acquired");
        Ok(FileProcessingStatus::Acquired)
    }

    /// The recorded hash of an existing internal copy, when its size still
    /// matches the source object.
    async fn existing_md5(
        &self,
        file_key: &str,
        source_size: u64,
    ) -> Result<Option<String>, ImportError> {
        match self.internal.head(file_key).await {
            Ok(info) if info.size == source_size => {
                Ok(info.metadata.get(metadata::MD5).cloned())
            }
            Ok(_) => Ok(None),
            Err(blob_store::StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn hash_source(&self, source_key: &str) -> Result<(String, u64), ImportError> {
        let mut reader = self.external.download(source_key).await?;
        let mut context = md5::Context::new();
        let mut total = 0u64;
        let mut buf = vec![0u8; stream_crypto::BUFFER_LEN];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(blob_store::StoreError::Io)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
            total += n as u64;
        }
        Ok((format!("{:x}", context.compute()), total))
    }
}
