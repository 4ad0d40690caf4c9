//! Failure-domain protection: circuit breakers, retry backoff, cancellation.
//!
//! One breaker instance guards each downstream dependency (LLM, vector
//! index, databases). The retry policy drives the SQL agent's refiner loop
//! backoff. Cancellation uses `tokio_util`'s token, re-exported so callers
//! share one vocabulary.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    BreakerState, CallOutcome, CircuitBreaker, CircuitBreakerConfig, Permit,
};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;

/// Run `fut` unless `token` fires first.
///
/// Returns `None` when cancelled. Every suspension point in the pipeline
/// goes through this (or an equivalent `select!`), which is what makes the
/// global deadline a hard cap.
pub async fn with_cancellation<T>(
    token: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        () = token.cancelled() => None,
        value = fut => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_cancellation_returns_value_when_not_cancelled() {
        let token = CancellationToken::new();
        let out = with_cancellation(&token, async { 7 }).await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn with_cancellation_returns_none_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let out = with_cancellation(&token, std::future::pending::<i32>()).await;
        assert_eq!(out, None);
    }
}
