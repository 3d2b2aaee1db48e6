//! # Convolution Arithmetic
//!
//! Padding schemes, strided cross-correlation, its transpose (used to carry a
//! delta back to the input) and the kernel gradient.
//!
//! ## Submodules
//!
//! - [`padding`]: [`PaddingMode`], [`Padding`] and [`Stride`]
//! - [`conv`]: [`convolve`], [`convolve_transposed`], [`kernels_gradient`]
//!
//! ## Consistency
//!
//! All three convolution operations resolve out-of-range reads through
//! [`PaddingMode::map_index`], so for any input `X`, kernels `K` and output
//! delta `D`:
//!
//! ```text
//! <convolve(X, K), D> == <X, convolve_transposed(K, D, shape(X))>
//! ```
//!
//! ## Example
//!
//! ```rust
//! use briny_train::ops::{convolve, Padding, PaddingMode, Stride};
//! use briny_train::tensors::{NTensor, TensorOps};
//!
//! let x = NTensor::from([[[1.0, 2.0], [3.0, 4.0]]]);
//! let k = NTensor::from_slices(vec![NTensor::from([[[1.0]]]).into()]).unwrap();
//! let y = convolve(&x, &k, Padding::new(PaddingMode::Circular, 1, 1), Stride::default()).unwrap();
//! assert_eq!(y.shape().dims(), &[1, 4, 4]);
//! ```

pub mod conv;
pub mod padding;

pub use conv::{
    ConvGeometry, channel_sums, convolve, convolve_into, convolve_transposed,
    convolve_transposed_into, correlate, kernels_gradient, kernels_gradient_into, output_dim,
};
pub use padding::{Padding, PaddingMode, Stride};
