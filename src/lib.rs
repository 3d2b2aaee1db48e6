//! # `briny_train`
//!
//! A small neural network training engine: tensor algebra, differentiable
//! layers, back propagation and parallel mini-batch stochastic gradient
//! descent, on the CPU and with nothing hidden behind an autograd graph.
//!
//! ## Features
//!
//! - **Tensors**: rank 1 and 2 containers plus composite rank-N tensors, all
//!   behind a rank-erased [`tensors::Tensor`] with checked views
//! - **Convolution**: zero, circular, reflection and replication padding with
//!   arbitrary stride, its transpose and the kernel gradient
//! - **Layers**: dense, convolution and flatten, with ReLU, leaky ReLU,
//!   logistic, linear and softmax activations
//! - **Training**: per-sample back propagation, gradients combined across a
//!   fixed worker pool via Rayon, and mini-batch SGD
//! - **Snapshots**: plain-data model descriptors validated with `briny`
//!
//! ## Modules
//!
//! - [`tensors`]: vectors, matrices, rank-N tensors and their algebra
//! - [`ops`]: padding schemes and convolution arithmetic
//! - [`nn`]: activations, costs, layers and models
//! - [`backprop`]: the forward/reverse pass over one sample
//! - [`grad`]: gradient accumulation and the parallel gradient computer
//! - [`optim`]: mini-batch SGD
//! - [`config`]: optimizer settings and the default worker count
//! - [`modelio`]: model descriptors
//! - [`approx`]: approximate float comparisons
//!
//! ## Logging
//!
//! The crate logs through the `log` facade and never installs a logger.
//! Batches and model construction are reported at `debug`, worker merges at
//! `trace`, epochs at `info`, and sanitized non-finite gradients at `warn`.
//!
//! ## Example
//!
//! ```rust
//! use briny_train::config::SgdConfig;
//! use briny_train::nn::{Activation, Cost, Dense, Model, Sample};
//! use briny_train::optim::Sgd;
//!
//! let mut model = Model::builder([2])
//!     .layer(Dense::new(3, Activation::Logistic))
//!     .layer(Dense::new(1, Activation::Linear))
//!     .seed(7)
//!     .build()?;
//! let data = vec![Sample::new([1.0, 0.0], [1.0]), Sample::new([0.0, 1.0], [-1.0])];
//!
//! let before = model.loss(&data, Cost::MeanSquaredError)?;
//! let mut sgd = Sgd::new(SgdConfig::default().with_learning_rate(0.1).with_seed(1).with_threads(1))?;
//! sgd.train(&mut model, &data, Cost::MeanSquaredError, 50)?;
//! assert!(model.loss(&data, Cost::MeanSquaredError)? < before);
//! # Ok::<(), briny_train::Error>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::similar_names,
    clippy::cast_precision_loss,
    clippy::module_name_repetitions
)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]
#![warn(missing_docs)]

pub mod approx;
pub mod backprop;
pub mod config;
pub mod error;
pub mod grad;
pub mod modelio;
pub mod nn;
pub mod ops;
pub mod optim;
pub mod tensors;

pub use error::{Error, Result};
