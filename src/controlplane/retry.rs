//! Bounded retry of optimistic-concurrency write conflicts
//!
//! Only [`Error::ClusterWriteConflict`] is retried here. Every other error is
//! returned to the caller on the first occurrence; the sync driver owns the
//! retry policy for those.

use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times, and how patiently, a conflicting write is re-attempted
#[derive(Debug, Clone)]
pub struct ConflictRetry {
    /// Total attempts including the first one
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl ConflictRetry {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    fn delays(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `operation` until it succeeds, fails with something other than a
/// write conflict, or exhausts the attempt budget.
///
/// The operation is expected to re-read whatever it writes on each call, so
/// a retry always works against the latest resourceVersion.
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &ConflictRetry,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e @ Error::ClusterWriteConflict { .. }) => {
                if attempt >= policy.attempts.max(1) {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Write conflict persisted, giving up"
                    );
                    return Err(e);
                }

                let delay = delays.next_backoff().unwrap_or(policy.max_delay);
                debug!(
                    operation = %operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Write conflict, re-reading and retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
