//! # Inclusion Polling
//!
//! Explicit confirmation loops used by the send path instead of fixed sleeps.

use super::correlation::CorrelationContext;
use crate::domain::{Result, XCallError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts for the Cosmos "fetch submitted transaction" step.
pub const TX_FETCH_ATTEMPTS: u32 = 30;

/// Delay between Cosmos transaction fetch attempts.
pub const TX_FETCH_DELAY: Duration = Duration::from_millis(200);

/// Poll `check` until it yields a value or `ctx` expires.
///
/// `Ok(None)` means "not included yet". Transient RPC errors are logged and
/// retried; any other error is returned immediately.
pub async fn await_inclusion<T, F, Fut>(
    ctx: &CorrelationContext,
    chain: &str,
    tx_id: &str,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match check().await {
            Ok(Some(value)) => {
                debug!(chain, tx = tx_id, attempts, "Transaction included");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                warn!(chain, tx = tx_id, error = %e, "Inclusion check failed, retrying");
            }
            Err(e) => return Err(e),
        }

        if ctx.is_cancelled() || ctx.is_expired() {
            return Err(XCallError::rpc(
                chain,
                format!("transaction {} not included after {} attempts", tx_id, attempts),
            ));
        }
        ctx.pause(interval).await;
    }
}

/// Poll `check` at most `attempts` times, `delay` apart.
pub async fn fetch_with_retry<T, F, Fut>(
    chain: &str,
    tx_id: &str,
    attempts: u32,
    delay: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    Err(match last_error {
        Some(e) => e,
        None => XCallError::rpc(
            chain,
            format!("transaction {} not found after {} attempts", tx_id, attempts),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_succeeds_late() {
        let calls = AtomicU32::new(0);
        let value = fetch_with_retry("cosmos", "ABC", TX_FETCH_ATTEMPTS, TX_FETCH_DELAY, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n >= 4).then_some(n)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let err = fetch_with_retry::<u32, _, _>("cosmos", "ABC", 30, TX_FETCH_DELAY, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 30);
        assert!(err.to_string().contains("ABC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_inclusion_bounded_by_context() {
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(3));
        let err = await_inclusion::<u32, _, _>(&ctx, "evm", "0x01", Duration::from_secs(1), || async {
            Ok(None)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, XCallError::Rpc { .. }));
    }

    #[tokio::test]
    async fn test_await_inclusion_stops_on_hard_error() {
        let ctx = CorrelationContext::with_timeout(Duration::from_secs(3));
        let err = await_inclusion::<u32, _, _>(&ctx, "evm", "0x01", Duration::from_millis(5), || async {
            Err(XCallError::Config("bad".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, XCallError::Config(_)));
    }
}
