//! Distributed mutual exclusion over the document store.
//!
//! A lock is a document in the `distributed_locks` collection keyed by the
//! lock name, holding an owner id and an expiry. Acquisition is an atomic
//! create-if-absent; an expired holder is atomically replaced. A TTL index
//! on `expires_at` reaps records orphaned by crashed holders.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use doc_store::{DocumentStore, Filter, StoreError};
use models::fields::collections::DISTRIBUTED_LOCKS;
use models::Document;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock '{0}' is no longer held by this owner")]
    LostOwnership(String),
    #[error("lock store failure")]
    Store(#[from] StoreError),
}

/// Hands out named locks backed by one document store.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn DocumentStore>,
}

impl LockManager {
    pub async fn new(store: Arc<dyn DocumentStore>) -> Result<LockManager, StoreError> {
        store.ensure_ttl(DISTRIBUTED_LOCKS, "expires_at").await?;
        Ok(LockManager { store })
    }

    /// Try to take the named lock. Returns `None` when another live owner
    /// holds it; an expired holder is replaced atomically, so concurrent
    /// acquirers see exactly one winner.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<LockHandle>, LockError> {
        let owner = Uuid::new_v4();
        let entry = lock_entry(name, owner, expiry(ttl));

        if self
            .store
            .insert_if_absent(DISTRIBUTED_LOCKS, name, entry.clone())
            .await?
        {
            tracing::debug!(lock = name, %owner, "acquired");
            return Ok(Some(self.handle(name, owner)));
        }

        // Occupied. Take over only if the holder's expiry has passed; the
        // conditional replace keeps concurrent takeovers single-winner.
        let expired = Filter::compare(
            doc_store::CompareOp::Le,
            "expires_at",
            Utc::now().to_rfc3339(),
        );
        if self
            .store
            .replace_if(DISTRIBUTED_LOCKS, name, &expired, entry)
            .await?
        {
            tracing::debug!(lock = name, %owner, "acquired from expired holder");
            return Ok(Some(self.handle(name, owner)));
        }
        Ok(None)
    }

    fn handle(&self, name: &str, owner: Uuid) -> LockHandle {
        LockHandle {
            store: self.store.clone(),
            name: name.to_string(),
            owner,
        }
    }
}

/// Proof of holding a lock. Dropping the handle does not release the lock;
/// call `release`, or let the TTL reap it.
pub struct LockHandle {
    store: Arc<dyn DocumentStore>,
    name: String,
    owner: Uuid,
}

impl LockHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push the expiry forward. False when another owner now holds the
    /// lock, in which case this handle is dead.
    pub async fn try_renew(&self, ttl: Duration) -> Result<bool, LockError> {
        let renewed = self
            .store
            .replace_if(
                DISTRIBUTED_LOCKS,
                &self.name,
                &self.owned(),
                lock_entry(&self.name, self.owner, expiry(ttl)),
            )
            .await?;
        if !renewed {
            tracing::warn!(lock = %self.name, owner = %self.owner, "renewal lost ownership");
        }
        Ok(renewed)
    }

    /// Delete the lock record if still owned; a missing or re-owned record
    /// is a no-op.
    pub async fn release(self) -> Result<(), LockError> {
        let released = self
            .store
            .delete_if(DISTRIBUTED_LOCKS, &self.name, &self.owned())
            .await?;
        tracing::debug!(lock = %self.name, owner = %self.owner, released, "released");
        Ok(())
    }

    fn owned(&self) -> Filter {
        Filter::eq("owner", self.owner.to_string())
    }
}

fn expiry(ttl: Duration) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
}

fn lock_entry(name: &str, owner: Uuid, expires_at: DateTime<Utc>) -> Document {
    [
        ("name".to_string(), json!(name)),
        ("owner".to_string(), json!(owner.to_string())),
        ("expires_at".to_string(), json!(expires_at.to_rfc3339())),
    ]
    .into_iter()
    .collect()
}
