/// Resilience patterns for the relay services
///
/// This library provides:
/// - **Classification**: `Transient` / `Fatal` / `Duplicate` error classes
/// - **Retry**: bounded exponential backoff with jitter, optionally driven by classification
/// - **Timeout**: time limits on every external call
///
/// # Example: Idempotent Store Write
///
/// ```rust,no_run
/// use resilience::{with_retry_classified, with_timeout, RetryConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let retry = RetryConfig {
///         max_retries: 5,
///         ..RetryConfig::default()
///     };
///
///     let result = with_retry_classified(retry, || async {
///         with_timeout(Duration::from_secs(10), async {
///             // Your database write
///         })
///         .await
///     })
///     .await;
/// }
/// ```

pub mod classify;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use classify::{Classify, ErrorClass};
pub use retry::{with_retry, with_retry_classified, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
