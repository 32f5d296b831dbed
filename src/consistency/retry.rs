use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::core::{DomainError, Result};

/// Runs a read-then-conditionally-write closure until it commits, fails
/// terminally, or exhausts the retry budget.
///
/// The closure must re-read everything it conditions on each time it is
/// called; only [`DomainError::PreconditionChanged`] triggers another round.
#[derive(Debug, Clone)]
pub struct OptimisticRetryExecutor {
    policy: RetryPolicy,
}

impl OptimisticRetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    if retries >= self.policy.max_retries {
                        warn!(
                            operation,
                            retries, "optimistic retry budget exhausted"
                        );
                        return Err(DomainError::Conflict(format!(
                            "{} still conflicting after {} retries",
                            operation, retries
                        )));
                    }

                    retries += 1;
                    let backoff_ms = self.policy.backoff_ms(retries);
                    warn!(
                        operation,
                        retry = retries,
                        max_retries = self.policy.max_retries,
                        backoff_ms,
                        error = %err,
                        "retrying after conflict"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }
}
