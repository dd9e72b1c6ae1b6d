//! Retry with reconnect between attempts

use crate::config::RetryConfig;
use crate::error::Result;
use futures::future::BoxFuture;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_secs_f64(config.initial_backoff.max(0.0)),
            backoff_factor: config.backoff_factor.max(1.0),
            max_backoff: Duration::from_secs_f64(config.max_backoff.max(0.0)),
        }
    }

    /// Delay before attempt `failed + 1`, given `failed` failures so far
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(31) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_factor.powi(exp);
        if secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` against `state` until it succeeds or attempts run out
    ///
    /// `on_failure` runs after every failed attempt except the last, before
    /// the backoff sleep. Its own errors are logged and dropped. When all
    /// attempts fail the last error is returned unchanged.
    pub async fn execute<S, T, Op, Hook>(&self, state: &mut S, mut op: Op, mut on_failure: Hook) -> Result<T>
    where
        S: Send,
        Op: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>>,
        Hook: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match op(&mut *state).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("giving up after {} attempts: {}", attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    debug!("attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    if let Err(hook_err) = on_failure(&mut *state).await {
                        warn!("reconnect failed: {}", hook_err);
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}
