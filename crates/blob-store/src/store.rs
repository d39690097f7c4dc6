use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque user metadata carried on an object. The store may decorate keys
/// on the wire but must round-trip them unchanged on read.
pub type UserMetadata = BTreeMap<String, String>;

pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming upload handle; the object is finalized by `shutdown`.
pub type ObjectWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Listing pages are capped at the store-conventional maximum.
pub const MAX_LIST_PAGE: usize = 1000;

pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("object '{0}' already exists")]
    Conflict(String),
    #[error("transient object-store failure")]
    Transient(#[source] std::io::Error),
    #[error("permanent object-store failure: {0}")]
    Permanent(String),
    #[error("object-store I/O failure")]
    Io(#[source] std::io::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub content_type: Option<String>,
    pub metadata: UserMetadata,
}

#[derive(Debug, Default)]
pub struct ListPage {
    pub items: Vec<ObjectInfo>,
    pub is_truncated: bool,
    pub next_token: Option<String>,
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Page through keys under `prefix` in lexicographic order. `page_size`
    /// is clamped to `MAX_LIST_PAGE`; `token` resumes a prior page.
    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Object metadata; `NotFound` when absent.
    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError>;

    async fn download(&self, key: &str) -> Result<ObjectReader, StoreError>;

    /// Single-shot upload from a reader.
    async fn upload(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<(), StoreError>;

    /// Streaming upload for large payloads; the object becomes visible
    /// when the returned writer is shut down.
    async fn open_write(
        &self,
        key: &str,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<ObjectWriter, StoreError>;

    /// Replace an object's user metadata (copy-with-replace semantics).
    async fn set_metadata(&self, key: &str, metadata: &UserMetadata) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// A time-limited download URL for the object.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<url::Url, StoreError>;
}

/// Collapse leading/trailing slashes; empty or whitespace-only means no
/// prefix at all.
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Join a normalized prefix onto a key.
pub(crate) fn prefixed_key(prefix: &Option<String>, key: &str) -> String {
    let key = key.trim_start_matches('/');
    match prefix {
        Some(prefix) => format!("{prefix}/{key}"),
        None => key.to_string(),
    }
}
