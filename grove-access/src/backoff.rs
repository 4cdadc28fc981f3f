// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delays between attempts of a failed background task.
#[cfg(test)]
use mock_instant::thread_local::Instant;
use std::time::Duration;
#[cfg(not(test))]
use std::time::Instant;

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tracing::trace;

#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry, doubled for every further one.
    pub base: Duration,

    /// Upper bound of a single delay, jitter included.
    pub max_delay: Duration,

    /// Random extra time added to every delay so failing workers do not retry in lockstep.
    pub jitter: Duration,

    /// Time after the first attempt during which retries are scheduled. `None` retries until
    /// the attempts of the task are used up.
    pub budget: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(20),
            max_delay: Duration::from_secs(2),
            jitter: Duration::from_millis(50),
            budget: Some(Duration::from_secs(60)),
        }
    }
}

impl BackoffConfig {
    /// Retry right away, useful for tests and inline execution.
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            budget: None,
        }
    }
}

/// Retry schedule of a single task.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    rng: ChaCha20Rng,
    retries: u32,
    started_at: Instant,
}

impl Backoff {
    pub fn new(config: BackoffConfig, rng: ChaCha20Rng) -> Self {
        Self {
            config,
            rng,
            retries: 0,
            started_at: Instant::now(),
        }
    }

    /// Number of delays handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns `true` once the retry budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.config
            .budget
            .is_some_and(|budget| self.started_at.elapsed() >= budget)
    }

    /// Delay before the next retry, `None` when no retry should follow anymore.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let factor = 1u32.checked_shl(self.retries).unwrap_or(u32::MAX);
        let exponential = self.config.base.saturating_mul(factor);
        self.retries = self.retries.saturating_add(1);

        let jitter = if self.config.jitter.is_zero() {
            Duration::ZERO
        } else {
            let millis = self.config.jitter.as_millis() as u64;
            Duration::from_millis(self.rng.random_range(0..=millis))
        };

        Some(exponential.saturating_add(jitter).min(self.config.max_delay))
    }

    pub async fn sleep(delay: Duration) {
        if delay.is_zero() {
            return;
        }

        trace!("backoff {} milliseconds", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}
