// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::backoff::BackoffConfig;

/// Default number of concurrently running background workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default number of nodes processed under one write lock.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Default number of attempts before a task is moved to the dead-letter list.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration of a grove and its background propagation.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Number of workers executing background tasks.
    pub workers: usize,

    /// Number of nodes a task handler processes before releasing the store lock.
    pub chunk_size: usize,

    /// Attempts per task, failed tasks are retried with backoff in between.
    pub max_attempts: u32,

    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}
