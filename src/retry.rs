use anyhow::Result;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff policy for stream reconnects: jittered, capped at 30s, and
/// without an elapsed-time ceiling so the bot never permanently gives up
/// on the transport.
pub fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        multiplier: 2.0,
        randomization_factor: 0.3,
        ..Default::default()
    }
}

/// Retry an async operation with doubling delay
///
/// Used for startup metadata fetches only. Order placement is never routed
/// through here: a failed order degrades to a no-op cycle and the engine
/// retries organically on later ticks.
pub async fn retry_async<F, Fut, T, E>(
    operation_name: &str,
    max_retries: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = Duration::from_millis(100);

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_retries {
                    return Err(anyhow::anyhow!(
                        "{} failed after {} attempts: {}",
                        operation_name,
                        attempt,
                        e
                    ));
                }
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}",
                    operation_name, attempt, max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(5));
            }
        }
    }
}
