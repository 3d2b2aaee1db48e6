//! Gradient accumulation and the parallel gradient computer.
//!
//! # Gradient receivers
//!
//! A [`GradientReceiver`] maps every learnable [`ParamId`] of a model to an
//! accumulator of the parameter's shape. Layers add into it during back
//! propagation; depositing against an id it does not track fails with
//! [`Error::UnregisteredParameter`].
//!
//! # Parallel reduction
//!
//! [`GradientComputer`] owns a fixed-size `rayon` pool and one
//! [`BackPropagator`] plus one receiver per worker, all created once and reused
//! for every batch. For a batch:
//!
//! 1. every worker zeroes its receiver
//! 2. workers claim sample indices from a shared `AtomicUsize`, so faster
//!    workers take more samples
//! 3. a finished worker merges its receiver into the combined one under a
//!    single `Mutex`
//! 4. once every worker has merged, non-finite elements of the combined
//!    gradients are replaced by zero and counted
//!
//! The combined gradient does not depend on how samples were distributed,
//! up to floating-point summation order. The first error of any worker stops
//! the others from claiming new samples and is returned.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backprop::BackPropagator;
use crate::config;
use crate::error::{Error, Result};
use crate::nn::{Cost, Model, ParamId, Sample};
use crate::tensors::{Shape, Tensor, TensorOps};

/// Per-parameter gradient accumulators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientReceiver {
    accumulators: BTreeMap<ParamId, Tensor>,
}

impl GradientReceiver {
    /// A receiver that tracks nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A zeroed receiver tracking every learnable parameter of `model`.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] if a layer names an id missing from
    /// the model's arena.
    pub fn for_model(model: &Model) -> Result<Self> {
        let mut receiver = Self::new();
        for id in model.learnable() {
            receiver.register(id, &model.parameters().get(id)?.shape())?;
        }
        Ok(receiver)
    }

    /// Starts tracking `id` with a zero accumulator of `shape`.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] for a rank-0 shape.
    pub fn register(&mut self, id: ParamId, shape: &Shape) -> Result<()> {
        self.accumulators.insert(id, Tensor::zeros(shape)?);
        Ok(())
    }

    /// Adds `gradient` to the accumulator of `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] for an untracked id,
    /// [`Error::ShapeMismatch`] for a gradient of the wrong shape.
    pub fn deposit(&mut self, id: ParamId, gradient: &Tensor) -> Result<()> {
        self.accumulator_mut(id)?.plus_assign(gradient)
    }

    /// The accumulator of `id`, for layers that add into it in place.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] for an untracked id.
    pub fn accumulator_mut(&mut self, id: ParamId) -> Result<&mut Tensor> {
        self.accumulators
            .get_mut(&id)
            .ok_or(Error::UnregisteredParameter(id))
    }

    /// The accumulated gradient of `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] for an untracked id.
    pub fn get(&self, id: ParamId) -> Result<&Tensor> {
        self.accumulators
            .get(&id)
            .ok_or(Error::UnregisteredParameter(id))
    }

    /// Adds every accumulator of `other` into this receiver.
    ///
    /// # Errors
    ///
    /// As [`GradientReceiver::deposit`], for the first failing parameter.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for (&id, gradient) in &other.accumulators {
            self.deposit(id, gradient)?;
        }
        Ok(())
    }

    /// Zeroes every accumulator.
    pub fn zero(&mut self) {
        for gradient in self.accumulators.values_mut() {
            gradient.fill(0.0);
        }
    }

    /// Replaces NaN and infinite elements by zero and returns how many there were.
    pub fn sanitize(&mut self) -> usize {
        self.accumulators.values_mut().map(TensorOps::sanitize).sum()
    }

    /// `(id, gradient)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Tensor)> + '_ {
        self.accumulators.iter().map(|(&id, g)| (id, g))
    }

    /// Number of tracked parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Whether no parameters are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }
}

/// Combined gradients of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGradients {
    /// Gradients summed over every sample of the batch.
    pub gradients: GradientReceiver,
    /// Cost summed over every sample of the batch.
    pub loss: f32,
    /// Number of samples processed.
    pub samples: usize,
    /// Non-finite elements replaced by zero after the merge.
    pub sanitized: usize,
}

/// Merges per-worker receivers into `into`, then sanitizes the result.
///
/// This is the reduction step of [`GradientComputer::compute`], exposed for
/// callers that accumulate gradients on their own.
///
/// # Errors
///
/// As [`GradientReceiver::merge`].
pub fn combine<'a>(
    parts: impl IntoIterator<Item = &'a GradientReceiver>,
    mut into: GradientReceiver,
) -> Result<(GradientReceiver, usize)> {
    for part in parts {
        into.merge(part)?;
    }
    let sanitized = sanitize_combined(&mut into);
    Ok((into, sanitized))
}

fn sanitize_combined(gradients: &mut GradientReceiver) -> usize {
    let sanitized = gradients.sanitize();
    if sanitized > 0 {
        warn!("replaced {sanitized} non-finite gradient elements with zero");
    }
    sanitized
}

struct Worker {
    propagator: BackPropagator,
    receiver: GradientReceiver,
}

/// Computes batch gradients on a fixed pool of worker threads.
pub struct GradientComputer {
    pool: ThreadPool,
    workers: Vec<Worker>,
    template: GradientReceiver,
    cost: Cost,
}

impl GradientComputer {
    /// Creates `threads` workers for `model` (the process default when `None`).
    ///
    /// Logs a warning if Softmax and cross-entropy are not paired.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for zero threads, [`Error::ThreadPool`] if the
    /// pool cannot be spawned.
    pub fn new(model: &Model, cost: Cost, threads: Option<usize>) -> Result<Self> {
        let threads = threads.unwrap_or_else(config::default_threads);
        if threads == 0 {
            return Err(Error::InvalidConfig("gradient computer needs at least one thread".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("grad-worker-{i}"))
            .build()?;
        model.warn_on_mispairing(cost);
        let template = GradientReceiver::for_model(model)?;
        let workers = (0..threads)
            .map(|_| {
                Ok(Worker {
                    propagator: BackPropagator::new(model, cost)?,
                    receiver: template.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pool,
            workers,
            template,
            cost,
        })
    }

    /// Number of workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// The cost being differentiated.
    #[must_use]
    pub const fn cost(&self) -> Cost {
        self.cost
    }

    /// Combined gradients of every sample in `batch`.
    ///
    /// # Errors
    ///
    /// The first error raised by any worker.
    pub fn compute(&mut self, model: &Model, batch: &[Sample]) -> Result<BatchGradients> {
        let indices: Vec<usize> = (0..batch.len()).collect();
        self.compute_indexed(model, batch, &indices)
    }

    /// Combined gradients of `data[i]` for every `i` in `indices`.
    ///
    /// # Errors
    ///
    /// The first error raised by any worker; [`Error::InvalidConfig`] for an
    /// index outside `data`.
    pub fn compute_indexed(
        &mut self,
        model: &Model,
        data: &[Sample],
        indices: &[usize],
    ) -> Result<BatchGradients> {
        let Self {
            pool,
            workers,
            template,
            ..
        } = self;
        debug!(
            "computing gradients of {} samples on {} workers",
            indices.len(),
            workers.len()
        );

        let next = AtomicUsize::new(0);
        let aborted = AtomicBool::new(false);
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        let fail = |e: Error| {
            lock(&failure).get_or_insert(e);
            aborted.store(true, Ordering::Release);
        };
        let combined = Mutex::new((template.clone(), 0.0_f32));

        pool.scope(|scope| {
            for (n, worker) in workers.iter_mut().enumerate() {
                let (next, aborted, fail, combined) = (&next, &aborted, &fail, &combined);
                scope.spawn(move |_| {
                    worker.receiver.zero();
                    let mut loss = 0.0;
                    let mut processed = 0_usize;
                    loop {
                        if aborted.load(Ordering::Acquire) {
                            return;
                        }
                        let Some(&i) = indices.get(next.fetch_add(1, Ordering::Relaxed)) else {
                            break;
                        };
                        let result = data
                            .get(i)
                            .ok_or_else(|| {
                                Error::InvalidConfig(format!(
                                    "sample index {i} out of range for {} samples",
                                    data.len()
                                ))
                            })
                            .and_then(|sample| {
                                worker
                                    .propagator
                                    .backpropagate(model, sample, &mut worker.receiver)
                            });
                        match result {
                            Ok(sample_loss) => {
                                loss += sample_loss;
                                processed += 1;
                            }
                            Err(e) => {
                                fail(e);
                                return;
                            }
                        }
                    }

                    let merged = {
                        let mut guard = lock(combined);
                        let (gradients, total) = &mut *guard;
                        *total += loss;
                        gradients.merge(&worker.receiver)
                    };
                    match merged {
                        Ok(()) => trace!("worker {n} merged {processed} samples"),
                        Err(e) => fail(e),
                    }
                });
            }
        });

        if let Some(e) = failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(e);
        }
        let (mut gradients, loss) = combined.into_inner().unwrap_or_else(PoisonError::into_inner);
        let sanitized = sanitize_combined(&mut gradients);
        Ok(BatchGradients {
            gradients,
            loss,
            samples: indices.len(),
            sanitized,
        })
    }
}

impl core::fmt::Debug for GradientComputer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GradientComputer")
            .field("threads", &self.workers.len())
            .field("cost", &self.cost)
            .field("parameters", &self.template.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Dense};

    fn model() -> Model {
        Model::builder([3])
            .layer(Dense::new(2, Activation::Logistic))
            .seed(5)
            .build()
            .unwrap()
    }

    #[test]
    fn unregistered_deposits_fail() {
        let model = model();
        let mut receiver = GradientReceiver::new();
        let id = model.learnable()[0];
        assert!(matches!(
            receiver.deposit(id, &Tensor::from([1.0])),
            Err(Error::UnregisteredParameter(missing)) if missing == id
        ));
    }

    #[test]
    fn merge_adds_and_zero_clears() {
        let model = model();
        let mut a = GradientReceiver::for_model(&model).unwrap();
        let b_id = model.learnable()[1];
        a.deposit(b_id, &Tensor::from([1.0, 2.0])).unwrap();
        let mut total = GradientReceiver::for_model(&model).unwrap();
        total.merge(&a).unwrap();
        total.merge(&a).unwrap();
        assert_eq!(total.get(b_id).unwrap(), &Tensor::from([2.0, 4.0]));
        total.zero();
        assert_eq!(total.get(b_id).unwrap(), &Tensor::from([0.0, 0.0]));
    }

    #[test]
    fn worker_errors_abort_the_batch() {
        let model = model();
        let mut computer = GradientComputer::new(&model, Cost::MeanSquaredError, Some(2)).unwrap();
        let data = vec![
            Sample::new([1.0, 2.0, 3.0], [0.0, 1.0]),
            Sample::new([1.0, 2.0], [0.0, 1.0]),
        ];
        assert!(matches!(
            computer.compute(&model, &data),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            computer.compute_indexed(&model, &data, &[0, 9]),
            Err(Error::InvalidConfig(_))
        ));
        let ok = computer.compute(&model, &data[..1]).unwrap();
        assert_eq!(ok.samples, 1);
        assert!(ok.loss > 0.0);
    }

    #[test]
    fn failing_workers_report_one_error() {
        let model = model();
        let mut computer = GradientComputer::new(&model, Cost::MeanSquaredError, Some(4)).unwrap();
        let bad = vec![Sample::new([1.0, 2.0], [0.0, 1.0]); 256];
        for _ in 0..3 {
            assert!(matches!(
                computer.compute(&model, &bad),
                Err(Error::ShapeMismatch { .. })
            ));
        }
        let good = vec![Sample::new([1.0, 2.0, 3.0], [0.0, 1.0]); 64];
        assert_eq!(computer.compute(&model, &good).unwrap().samples, 64);
    }
}
