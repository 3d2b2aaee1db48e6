//! Training configuration.
//!
//! # Worker count
//!
//! Gradient computation runs on a fixed-size worker pool. Unless an
//! [`SgdConfig`] names a thread count, the pool takes the process-wide default
//! from [`default_threads`], which starts out as the hardware parallelism
//! reported by [`std::thread::available_parallelism`] and can be overridden
//! with [`set_default_threads`].
//!
//! The default is stored in an `AtomicUsize`; zero means "not overridden".
//!
//! # Example
//!
//! ```
//! use briny_train::config::{self, SgdConfig};
//!
//! config::set_default_threads(2);
//! assert_eq!(config::default_threads(), 2);
//!
//! let cfg = SgdConfig::default().with_learning_rate(0.05).with_batch_size(16);
//! assert!(cfg.validate().is_ok());
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};
use std::num::NonZeroUsize;

use crate::error::{Error, Result};

static DEFAULT_THREADS: AtomicUsize = AtomicUsize::new(0);

/// Overrides the worker count used when a configuration does not set one.
/// Passing zero restores the hardware default.
pub fn set_default_threads(threads: usize) {
    DEFAULT_THREADS.store(threads, Ordering::Release);
}

/// The worker count used when a configuration does not set one.
#[must_use]
pub fn default_threads() -> usize {
    match DEFAULT_THREADS.load(Ordering::Acquire) {
        0 => std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        n => n,
    }
}

/// Hyperparameters of mini-batch stochastic gradient descent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdConfig {
    /// Step size applied to the mean gradient of each batch.
    pub learning_rate: f32,
    /// Samples per batch; the last batch of an epoch may be smaller.
    pub batch_size: usize,
    /// Gradient workers; `None` uses [`default_threads`].
    pub threads: Option<usize>,
    /// Seed of the shuffling RNG; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            batch_size: 32,
            threads: None,
            seed: None,
        }
    }
}

impl SgdConfig {
    /// Sets the learning rate.
    #[must_use]
    pub const fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Seeds the shuffling RNG.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The worker count this configuration resolves to.
    #[must_use]
    pub fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(default_threads)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a non-finite or non-positive learning
    /// rate, a zero batch size or zero threads.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidConfig("thread count must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_values() {
        assert!(SgdConfig::default().validate().is_ok());
        assert!(SgdConfig::default().with_batch_size(0).validate().is_err());
        assert!(SgdConfig::default().with_threads(0).validate().is_err());
        assert!(SgdConfig::default().with_learning_rate(f32::NAN).validate().is_err());
        assert!(SgdConfig::default().with_learning_rate(-1.0).validate().is_err());
    }

    #[test]
    fn explicit_threads_win() {
        assert_eq!(SgdConfig::default().with_threads(3).resolved_threads(), 3);
        assert!(default_threads() >= 1);
    }
}
