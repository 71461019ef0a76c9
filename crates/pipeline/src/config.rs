//! Executor configuration.

use crate::{Error, Result};
use std::num::NonZeroUsize;

/// Default number of worker threads per run.
pub const DEFAULT_WORKERS: usize = 1;

/// Pipeline executor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Worker threads used by [`Pipeline::run`](crate::Pipeline::run)
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ExecutorConfig {
    /// Create a configuration running on `workers` threads.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    /// Hardware concurrency hint, if the platform reports one.
    #[must_use]
    pub fn available_parallelism() -> Option<usize> {
        std::thread::available_parallelism()
            .ok()
            .map(NonZeroUsize::get)
    }

    /// Check a worker count against the hardware ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidThreadCount`] if `workers` is zero or exceeds
    /// the available parallelism.
    pub fn validate_workers(workers: usize) -> Result<()> {
        let available = Self::available_parallelism();
        if workers == 0 || available.is_some_and(|limit| workers > limit) {
            return Err(Error::InvalidThreadCount {
                requested: workers,
                available,
            });
        }
        Ok(())
    }
}
