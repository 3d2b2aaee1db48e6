//! Mini-batch stochastic gradient descent.
//!
//! Each call to [`Sgd::apply`] is one epoch:
//!
//! 1. draw a fresh uniform permutation of the training data
//! 2. cut it into contiguous batches of `batch_size` (the last may be smaller)
//! 3. compute the combined gradient of each batch in parallel
//! 4. update every parameter: `p ← p − g · (learning_rate / batch_len)`
//!
//! Dividing by the actual batch length rather than the configured size keeps
//! the step of a short final batch on the same scale as the others.
//!
//! # Example
//!
//! ```rust
//! use briny_train::config::SgdConfig;
//! use briny_train::nn::{Activation, Cost, Dense, Model, Sample};
//! use briny_train::optim::Sgd;
//!
//! let mut model = Model::builder([2])
//!     .layer(Dense::new(4, Activation::Logistic))
//!     .layer(Dense::new(1, Activation::Logistic))
//!     .seed(1)
//!     .build()
//!     .unwrap();
//! let data = vec![
//!     Sample::new([0.0, 0.0], [0.0]),
//!     Sample::new([0.0, 1.0], [1.0]),
//!     Sample::new([1.0, 0.0], [1.0]),
//!     Sample::new([1.0, 1.0], [1.0]),
//! ];
//! let config = SgdConfig::default().with_learning_rate(2.0).with_batch_size(4).with_seed(9).with_threads(2);
//! let mut sgd = Sgd::new(config).unwrap();
//! let reports = sgd.train(&mut model, &data, Cost::MeanSquaredError, 200).unwrap();
//! assert!(reports.last().unwrap().mean_loss < reports[0].mean_loss);
//! ```

use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::SgdConfig;
use crate::error::Result;
use crate::grad::{GradientComputer, GradientReceiver};
use crate::nn::{Cost, Model, Sample};
use crate::tensors::TensorOps;

/// Outcome of one pass over the training data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// Batches applied.
    pub batches: usize,
    /// Samples seen.
    pub samples: usize,
    /// Mean per-sample cost, measured before each batch's update.
    pub mean_loss: f32,
    /// Non-finite gradient elements replaced by zero.
    pub sanitized: usize,
}

/// Mini-batch SGD optimizer.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
    rng: StdRng,
}

impl Sgd {
    /// Creates an optimizer, seeding its shuffling RNG from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config` does
    /// not validate.
    pub fn new(config: SgdConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Self { config, rng })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// A gradient computer for `model` with this optimizer's thread count.
    ///
    /// # Errors
    ///
    /// See [`GradientComputer::new`].
    pub fn computer(&self, model: &Model, cost: Cost) -> Result<GradientComputer> {
        GradientComputer::new(model, cost, Some(self.config.resolved_threads()))
    }

    /// Runs one epoch over `data`.
    ///
    /// Builds a fresh [`GradientComputer`]; use [`Sgd::apply_with`] or
    /// [`Sgd::train`] to reuse one across epochs.
    ///
    /// # Errors
    ///
    /// The first error of any batch. Batches applied before it stay applied.
    pub fn apply(&mut self, model: &mut Model, data: &[Sample], cost: Cost) -> Result<EpochReport> {
        let mut computer = self.computer(model, cost)?;
        self.apply_with(&mut computer, model, data)
    }

    /// Runs one epoch over `data` with an existing computer.
    ///
    /// # Errors
    ///
    /// The first error of any batch. Batches applied before it stay applied.
    pub fn apply_with(
        &mut self,
        computer: &mut GradientComputer,
        model: &mut Model,
        data: &[Sample],
    ) -> Result<EpochReport> {
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut self.rng);

        let mut report = EpochReport {
            batches: 0,
            samples: 0,
            mean_loss: 0.0,
            sanitized: 0,
        };
        let mut total_loss = 0.0;
        for chunk in order.chunks(self.config.batch_size) {
            let batch = computer.compute_indexed(model, data, chunk)?;
            self.step(model, &batch.gradients, chunk.len())?;
            report.batches += 1;
            report.samples += batch.samples;
            report.sanitized += batch.sanitized;
            total_loss += batch.loss;
        }
        if report.samples > 0 {
            report.mean_loss = total_loss / report.samples as f32;
        }
        Ok(report)
    }

    /// Runs `epochs` epochs, reusing one gradient computer, and logs each at `info`.
    ///
    /// # Errors
    ///
    /// The first error of any epoch.
    pub fn train(
        &mut self,
        model: &mut Model,
        data: &[Sample],
        cost: Cost,
        epochs: usize,
    ) -> Result<Vec<EpochReport>> {
        let mut computer = self.computer(model, cost)?;
        let mut reports = Vec::with_capacity(epochs);
        for epoch in 1..=epochs {
            let report = self.apply_with(&mut computer, model, data)?;
            info!(
                "epoch {epoch}/{epochs}: mean {cost} {:.6} over {} batches",
                report.mean_loss, report.batches
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Applies `p ← p − g · (learning_rate / samples)` to every parameter.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`](crate::Error::UnregisteredParameter)
    /// if `gradients` lacks a parameter of `model`, or a shape mismatch.
    pub fn step(&self, model: &mut Model, gradients: &GradientReceiver, samples: usize) -> Result<()> {
        if samples == 0 {
            return Ok(());
        }
        let scale = self.config.learning_rate / samples as f32;
        model
            .parameters_mut()
            .par_update(|id, param| param.zip_assign(gradients.get(id)?, |p, g| p - g * scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Dense};

    #[test]
    fn empty_data_applies_nothing() {
        let mut model = Model::builder([1])
            .layer(Dense::new(1, Activation::Linear))
            .seed(0)
            .build()
            .unwrap();
        let before = model.parameters().clone();
        let mut sgd = Sgd::new(SgdConfig::default().with_threads(1).with_seed(0)).unwrap();
        let report = sgd.apply(&mut model, &[], Cost::MeanSquaredError).unwrap();
        assert_eq!(report.batches, 0);
        assert_eq!(model.parameters(), &before);
    }

    #[test]
    fn batches_cover_the_data() {
        let mut model = Model::builder([1])
            .layer(Dense::new(1, Activation::Linear))
            .seed(0)
            .build()
            .unwrap();
        let data: Vec<Sample> = (0..10)
            .map(|i| Sample::new([i as f32], [2.0 * i as f32]))
            .collect();
        let config = SgdConfig::default()
            .with_batch_size(4)
            .with_threads(2)
            .with_seed(3)
            .with_learning_rate(0.01);
        let mut sgd = Sgd::new(config).unwrap();
        let report = sgd.apply(&mut model, &data, Cost::MeanSquaredError).unwrap();
        assert_eq!((report.batches, report.samples), (3, 10));
    }
}
