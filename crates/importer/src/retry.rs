use std::future::Future;
use std::time::Duration;

/// Run `op` with exponential backoff on transient failures, up to
/// `max_retries` additional attempts. Non-transient errors surface
/// immediately.
pub async fn with_retries<T, E, F, Fut>(
    name: &str,
    max_retries: u32,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let backoff = exponential_backoff::Backoff::new(
        max_retries,
        Duration::from_millis(100),
        Some(Duration::from_secs(30)),
    );
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < max_retries => {
                attempt += 1;
                let wait = backoff.next(attempt).unwrap_or(Duration::from_secs(30));
                tracing::warn!(%err, op = name, attempt, ?wait, "transient failure, backing off");
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}
