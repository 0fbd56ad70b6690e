use std::future::Future;

use tracing::debug;

/// Run `action`; on failure run `recover` once and try `action` a second
/// time. The second attempt's result is returned as-is.
///
/// This is a single-retry policy, not backoff: the one failure class worth
/// recovering from is credential expiry, and `recover` (a token refresh) is
/// expected to make the next attempt succeed. The recovery outcome is
/// ignored; if it failed, the second attempt's error is the one surfaced.
pub async fn retry_with_recovery<T, E, A, AF, R, RF, RO>(mut action: A, recover: R) -> Result<T, E>
where
    A: FnMut() -> AF,
    AF: Future<Output = Result<T, E>>,
    R: FnOnce() -> RF,
    RF: Future<Output = RO>,
{
    match action().await {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!("action failed, running recovery before the retry");
            let _ = recover().await;
            action().await
        }
    }
}
