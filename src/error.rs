//! Error taxonomy and retry logic
//!
//! Provides the typed store-layer error taxonomy and the bounded retry
//! mechanism applied to idempotent read calls.

use std::time::Duration;

use tokio::time::sleep;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the document store and the mutation/orchestration
/// layers built on top of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Referenced path, branch, or workflow does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency revision mismatch, or ref already exists
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed operation parameters; fails before any remote call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport or timeout failure talking to the remote store
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Non-2xx remote response not covered by a more specific variant
    #[error("remote API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Values document could not be parsed or serialized
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether a fresh attempt of the same call could succeed.
    ///
    /// Only transport failures and 5xx responses qualify; NotFound,
    /// Conflict, and InvalidArgument are definitive answers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RemoteUnavailable(_) => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::RemoteUnavailable(err.to_string())
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,

    /// Initial delay between attempts
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Execute an idempotent operation with retry.
///
/// Must only wrap read calls (`read_file`, run/dir listings). Branch
/// creation, file writes, pull-request creation, and workflow dispatch are
/// not idempotent and go through the store without this wrapper.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                tracing::warn!(
                    attempt = attempts,
                    max = policy.max_attempts,
                    error = %e,
                    "retryable call failed, backing off {:?}",
                    delay
                );
                sleep(delay).await;

                // Exponential backoff
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retryable() {
        assert!(Error::RemoteUnavailable("timeout".into()).is_retryable());
        assert!(Error::Api {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!Error::NotFound("missing".into()).is_retryable());
        assert!(!Error::Conflict("stale".into()).is_retryable());
        assert!(!Error::InvalidArgument("bad slot".into()).is_retryable());
        assert!(!Error::Api {
            status: 422,
            message: "unprocessable".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);

        let no_retry = RetryPolicy::no_retry();
        assert_eq!(no_retry.max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::RemoteUnavailable("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_conflict() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Conflict("stale revision".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
