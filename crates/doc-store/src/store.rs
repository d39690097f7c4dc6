use crate::filter::Filter;
use crate::query::{QueryParameters, QueryResult};
use models::Document;

/// Failures of document persistence, by kind rather than by backend.
/// `Transient` is the only retryable kind.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },
    #[error("document '{id}' already exists in '{collection}'")]
    Conflict { collection: String, id: String },
    #[error("transient store failure: {0}")]
    Transient(String),
    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid query expression: {0}")]
    BadExpression(String),
    #[error("invalid query range: {0}")]
    BadRange(String),
    #[error("store unavailable")]
    StoreUnavailable(#[source] Box<StoreError>),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> QueryError {
        QueryError::StoreUnavailable(Box::new(err))
    }
}

/// The seam between the pipelines and whichever document database backs
/// them. Writes are single-document; `replace_if`, `insert_if_absent` and
/// `delete_if` must be atomic per document.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, params: &QueryParameters) -> Result<QueryResult, QueryError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new document; `Conflict` when the id is already present.
    async fn insert(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Insert or fully replace.
    async fn upsert(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Replace an existing document; false when the id is absent.
    async fn update(&self, collection: &str, id: &str, doc: Document) -> Result<bool, StoreError>;

    /// Atomic create-if-absent; false when something already holds the id.
    async fn insert_if_absent(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<bool, StoreError>;

    /// Atomic conditional replace: succeeds only when the current document
    /// matches `expected`.
    async fn replace_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
        doc: Document,
    ) -> Result<bool, StoreError>;

    /// Delete by id; false when absent.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Atomic conditional delete: succeeds only when the current document
    /// matches `expected`. Absent id is a no-op false.
    async fn delete_if(
        &self,
        collection: &str,
        id: &str,
        expected: &Filter,
    ) -> Result<bool, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Register a TTL field on a collection: documents whose field holds a
    /// past timestamp expire at that time (expireAfter=0 semantics).
    async fn ensure_ttl(&self, collection: &str, field: &str) -> Result<(), StoreError>;
}
