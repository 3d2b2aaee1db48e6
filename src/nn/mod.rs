//! Layers, activations, costs and the model that ties them together.
//!
//! A [`Model`] is an ordered list of built layers plus the [`Parameters`]
//! arena holding every learnable tensor. Layers refer to their weights by
//! [`ParamId`]; the same ids key the gradients produced by back propagation,
//! so the optimizer can update the arena without going through the layers.
//!
//! ```rust
//! use briny_train::nn::{Activation, Cost, Dense, Model, Sample};
//! use briny_train::tensors::TensorOps;
//!
//! let model = Model::builder([2])
//!     .layer(Dense::new(3, Activation::ReLU))
//!     .layer(Dense::new(2, Activation::Softmax))
//!     .seed(42)
//!     .build()
//!     .unwrap();
//!
//! let probabilities = model.predict(&[0.5, -1.0].into()).unwrap();
//! assert_eq!(probabilities.shape().dims(), &[2]);
//!
//! let samples = [Sample::new([0.5, -1.0], [1.0, 0.0])];
//! assert!(model.loss(&samples, Cost::CrossEntropy).unwrap() > 0.0);
//! ```

mod activation;
mod cost;
pub mod layers;
mod model;
mod params;

pub use activation::{Activation, LEAKY_RELU_SLOPE};
pub use cost::Cost;
pub use layers::{
    BuildLayer, Convolution, ConvolutionLayer, Dense, DenseLayer, Flatten, FlattenLayer,
    InitContext, Layer,
};
pub use model::{Model, ModelBuilder, Sample};
pub use params::{ParamId, Parameters};
