use std::future::Future;
use std::time::Duration;

use crate::errors::VpnError;

/// Retry `attempt` with exponential backoff (250ms, 500ms, 1s, 2s, ...)
/// until it succeeds, returns a non-retryable error, or the total elapsed
/// time exceeds `budget` (spec: 60s total for the VPN provisioner).
pub async fn retry_with_backoff<F, Fut, T>(budget: Duration, mut attempt: F) -> Result<T, VpnError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VpnError>>,
{
    let start = tokio::time::Instant::now();
    let mut delay = Duration::from_millis(250);
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) => {
                let message = err.to_string();
                last_error = Some(message);
                if start.elapsed() + delay >= budget {
                    break;
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
        }
    }

    Err(VpnError::RetriesExhausted {
        attempts,
        last: last_error.unwrap_or_else(|| "unknown error".to_string()),
    })
}

fn is_retryable(err: &VpnError) -> bool {
    match err {
        VpnError::Transport(e) => e.is_timeout() || e.is_connect() || e.status().map(|s| s.is_server_error()).unwrap_or(true),
        VpnError::Rejected(status) => *status >= 500,
        VpnError::Decode(_) => false,
        VpnError::RetriesExhausted { .. } => false,
    }
}
