/// Timeout wrapper for async operations
use crate::classify::{Classify, ErrorClass};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, thiserror::Error)]
#[error("Operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);

/// An elapsed deadline says nothing about the operation itself, so it is retryable
impl Classify for TimeoutError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Transient
    }
}

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_success() {
        let result = with_timeout(Duration::from_secs(1), async { 42 }).await;
        assert_eq!(tokio_test::assert_ok!(result), 42);
    }

    #[tokio::test]
    async fn test_timeout_elapsed_is_transient() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        let err = tokio_test::assert_err!(result);
        assert_eq!(err.0, Duration::from_millis(10));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_passes_inner_result_through() {
        let result = with_timeout(Duration::from_secs(1), async {
            Err::<i32, _>("operation failed")
        })
        .await;

        assert_eq!(result.unwrap(), Err("operation failed"));
    }
}
