use serde::Deserialize;

/// Tunables of the import pipelines. Loading from disk or environment is
/// the caller's concern.
#[derive(Clone, Debug, Deserialize)]
pub struct ImportConfig {
    /// Prefix encrypted drops are discovered under in the external store.
    #[serde(default)]
    pub source_external_prefix: String,
    /// Prefix verified ciphertext copies land under in the internal store.
    #[serde(default)]
    pub target_internal_prefix: String,
    /// Process-wide ASCII salt for per-file key derivation.
    pub crypto_salt: String,
    /// Listing page size against the external store.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Skip re-acquiring files whose ciphertext already matches the
    /// internal copy, making re-runs cheap.
    #[serde(default = "default_true")]
    pub skip_unchanged: bool,
    /// Ingestion worker-pool size. The default of 1 is always safe;
    /// larger values assume per-file primary-key spaces are disjoint.
    #[serde(default = "default_ingest_workers")]
    pub ingest_workers: usize,
    /// Emit progress after this many rows of a file.
    #[serde(default = "default_progress_rows")]
    pub progress_row_interval: u64,
    /// Retry ceiling for transient store failures.
    #[serde(default = "default_max_retries")]
    pub max_transient_retries: u32,
}

fn default_list_page_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_ingest_workers() -> usize {
    1
}

fn default_progress_rows() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    5
}

impl ImportConfig {
    pub fn new(salt: &str) -> ImportConfig {
        ImportConfig {
            source_external_prefix: String::new(),
            target_internal_prefix: String::new(),
            crypto_salt: salt.to_string(),
            list_page_size: default_list_page_size(),
            skip_unchanged: true,
            ingest_workers: default_ingest_workers(),
            progress_row_interval: default_progress_rows(),
            max_transient_retries: default_max_retries(),
        }
    }
}
