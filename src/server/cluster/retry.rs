//! Bounded retry for read-then-write sequences that lose a race.
//!
//! The operation passed in must redo its read on every attempt; only
//! [`ClusterError::Conflict`] and [`ClusterError::AlreadyExists`] are retried, everything else is
//! returned to the caller on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::ClusterError;

#[derive(Clone, Debug)]
pub struct ConflictRetry {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between attempts, jittered by 0.5x to 1.5x
    pub delay: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

impl ConflictRetry {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e @ (ClusterError::Conflict { .. } | ClusterError::AlreadyExists { .. }))
                    if attempt < self.max_attempts =>
                {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let delay = Duration::from_secs_f64(self.delay.as_secs_f64() * jitter);
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Lost a write race, re-reading and retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
