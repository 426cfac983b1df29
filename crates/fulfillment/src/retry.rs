//! Call-site retry for store operations.

use std::future::Future;
use std::time::Duration;

use common::{RetryError, RetryStrategy, retry};
use domain::StoreError;

/// Backoff applied to transient store failures before giving up.
pub fn default_store_retry() -> RetryStrategy {
    RetryStrategy::exponential(3, Duration::from_millis(50), Duration::from_secs(1))
}

/// Retries `operation` while it fails with a transient [`StoreError`].
pub(crate) async fn with_store_retry<T, F, Fut>(
    strategy: &RetryStrategy,
    operation_name: &str,
    operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry(strategy, operation_name, StoreError::is_transient, operation)
        .await
        .map_err(RetryError::into_inner)
}
