use crate::config::CleanseConfig;
use crate::engine::CleanseEngine;
use crate::exporter::ReportExporter;
use crate::issue_store::{IssueCommandService, IssueStore};
use crate::operations::OperationStore;
use crate::queries::CtsSamQueryService;
use crate::CleanseError;
use blob_store::BlobStore;
use dist_lock::{LockHandle, LockManager};
use doc_store::DocumentStore;
use models::CleanseOperation;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Name of the lock that makes the analysis a cluster-wide singleton.
pub const ANALYSIS_LOCK: &str = "cleanse-analysis";

/// Owns the lifecycle of an analysis run: the distributed lock and its
/// renewer task, the engine scan, stale-issue deactivation, terminal
/// status, and the report export.
pub struct CleanseCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    locks: LockManager,
    engine: CleanseEngine,
    issues: IssueCommandService,
    operations: OperationStore,
    exporter: ReportExporter,
    config: CleanseConfig,
    current_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl CleanseCoordinator {
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        internal: Arc<dyn BlobStore>,
        config: CleanseConfig,
    ) -> Result<CleanseCoordinator, CleanseError> {
        let locks = LockManager::new(store.clone())
            .await
            .map_err(CleanseError::Store)?;
        let issues = IssueCommandService::new(IssueStore::new(store.clone()));
        let operations = OperationStore::new(store.clone());
        let queries = CtsSamQueryService::new(store, config.clone());
        let engine = CleanseEngine::new(
            queries,
            issues.clone(),
            operations.clone(),
            config.clone(),
        );
        let exporter = ReportExporter::new(
            internal,
            issues.store().clone(),
            operations.clone(),
            config.clone(),
        );

        Ok(CleanseCoordinator {
            inner: Arc::new(Inner {
                locks,
                engine,
                issues,
                operations,
                exporter,
                config,
                current_cancel: std::sync::Mutex::new(None),
            }),
        })
    }

    pub fn operations(&self) -> &OperationStore {
        &self.inner.operations
    }

    pub fn issues(&self) -> &IssueCommandService {
        &self.inner.issues
    }

    /// Try to begin an analysis. Returns `None` when another run holds the
    /// lock. On success the analysis proceeds on its own task; the
    /// returned descriptor is the just-created Running operation.
    pub async fn start_analysis(&self) -> Result<Option<CleanseOperation>, CleanseError> {
        let Some(lock) = self.try_lock().await? else {
            return Ok(None);
        };
        let operation = self
            .inner
            .operations
            .create_running(Uuid::new_v4())
            .await?;
        let cancel = self.register_cancel();

        let inner = self.inner.clone();
        let operation_id = operation.operation_id;
        tokio::spawn(async move {
            if let Err(err) = run_to_completion(inner, operation_id, lock, cancel).await {
                tracing::error!(%operation_id, %err, "analysis task failed");
            }
        });
        Ok(Some(operation))
    }

    /// Synchronous variant: identical behavior, but awaits completion and
    /// surfaces failures to the caller.
    pub async fn run_analysis(&self) -> Result<Option<CleanseOperation>, CleanseError> {
        let Some(lock) = self.try_lock().await? else {
            return Ok(None);
        };
        let operation = self
            .inner
            .operations
            .create_running(Uuid::new_v4())
            .await?;
        let cancel = self.register_cancel();

        run_to_completion(self.inner.clone(), operation.operation_id, lock, cancel).await?;
        Ok(self.inner.operations.get(operation.operation_id).await?)
    }

    /// Ask the running analysis, if any, to stop after its current batch.
    pub fn cancel_running(&self) {
        if let Some(cancel) = self.inner.current_cancel.lock().unwrap().as_ref() {
            cancel.cancel();
        }
    }

    async fn try_lock(&self) -> Result<Option<LockHandle>, CleanseError> {
        Ok(self
            .inner
            .locks
            .try_acquire(ANALYSIS_LOCK, self.inner.config.lock_ttl)
            .await?)
    }

    fn register_cancel(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        *self.inner.current_cancel.lock().unwrap() = Some(cancel.clone());
        cancel
    }
}

async fn run_to_completion(
    inner: Arc<Inner>,
    operation_id: Uuid,
    lock: LockHandle,
    cancel: CancellationToken,
) -> Result<(), CleanseError> {
    let started = Instant::now();
    let lock = Arc::new(lock);

    // The renewer runs beside the analysis on its own schedule. Its
    // cancellation is linked to the analysis: stopped and awaited before
    // the lock is released.
    let renew_cancel = cancel.child_token();
    let renewer = tokio::spawn(renew_loop(
        lock.clone(),
        inner.config.lock_ttl,
        inner.config.renew_interval,
        renew_cancel.clone(),
    ));

    let result = inner.engine.execute(operation_id, &cancel).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(_ctx) => {
            let resolved = inner.issues.deactivate_stale_issues(operation_id).await?;
            inner
                .operations
                .complete(operation_id, resolved, duration_ms)
                .await?;
            inner.exporter.export(operation_id).await.map(|_| ())
        }
        Err(CleanseError::Cancelled) => {
            tracing::warn!(%operation_id, "analysis cancelled");
            inner.operations.cancel(operation_id, duration_ms).await
        }
        Err(err) => {
            inner
                .operations
                .fail(operation_id, err.to_string(), duration_ms)
                .await?;
            Err(err)
        }
    };

    renew_cancel.cancel();
    let _ = renewer.await;
    if let Ok(lock) = Arc::try_unwrap(lock) {
        if let Err(err) = lock.release().await {
            tracing::warn!(%err, "failed to release the analysis lock");
        }
    }
    outcome
}

/// Refresh the lock on a fixed interval until cancelled. Renewal failure
/// is non-fatal: the analysis keeps running and the loss is only logged.
async fn renew_loop(
    lock: Arc<LockHandle>,
    ttl: std::time::Duration,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
        match lock.try_renew(ttl).await {
            Ok(true) => tracing::debug!(lock = lock.name(), "renewed"),
            Ok(false) => {
                tracing::warn!(lock = lock.name(), "lost lock ownership; analysis continues")
            }
            Err(err) => tracing::warn!(lock = lock.name(), %err, "lock renewal failed"),
        }
    }
}
