use serde::Deserialize;
use std::time::Duration;

/// Tunables of the cleanse analysis.
#[derive(Clone, Debug, Deserialize)]
pub struct CleanseConfig {
    /// Collection holding CTS CPH holdings.
    #[serde(default = "default_cts_collection")]
    pub cts_collection: String,
    /// Collection holding SAM CPH holdings.
    #[serde(default = "default_sam_collection")]
    pub sam_collection: String,
    /// Page size of the holding scans.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Records between progress updates.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// TTL of the `cleanse-analysis` lock.
    #[serde(default = "default_lock_ttl", with = "humantime_seconds")]
    pub lock_ttl: Duration,
    /// How often the renewer refreshes the lock.
    #[serde(default = "default_renew_interval", with = "humantime_seconds")]
    pub renew_interval: Duration,
    /// Reports land under this prefix in the internal store.
    #[serde(default = "default_reports_prefix")]
    pub reports_prefix: String,
    /// TTL of the presigned report URL.
    #[serde(default = "default_report_url_ttl", with = "humantime_seconds")]
    pub report_url_ttl: Duration,
}

/// Durations configure as whole seconds.
mod humantime_seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(de)?))
    }
}

fn default_cts_collection() -> String {
    "cts_cph_holding".to_string()
}

fn default_sam_collection() -> String {
    "sam_cph_holding".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_progress_interval() -> u64 {
    100
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_renew_interval() -> Duration {
    Duration::from_secs(2 * 60)
}

fn default_reports_prefix() -> String {
    "reports".to_string()
}

fn default_report_url_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

impl Default for CleanseConfig {
    fn default() -> CleanseConfig {
        CleanseConfig {
            cts_collection: default_cts_collection(),
            sam_collection: default_sam_collection(),
            page_size: default_page_size(),
            progress_interval: default_progress_interval(),
            lock_ttl: default_lock_ttl(),
            renew_interval: default_renew_interval(),
            reports_prefix: default_reports_prefix(),
            report_url_ttl: default_report_url_ttl(),
        }
    }
}
