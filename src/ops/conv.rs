//! Strided, padded 2D cross-correlation and its two derivatives.
//!
//! # Layouts
//!
//! - input: `[C, H, W]`
//! - kernels: `[F, C, kH, kW]`
//! - output / output delta: `[F, H', W']`
//!
//! with `H' = floor((H + 2·pH − kH) / sH) + 1` and likewise for `W'`.
//!
//! # Operations
//!
//! - [`convolve`]: the forward pass (kernels are not flipped)
//! - [`convolve_transposed`]: the adjoint, mapping an output delta back onto
//!   the input by scatter-add through the same padding mapping
//! - [`kernels_gradient`]: correlation of the output delta with the padded
//!   input, one `[C, kH, kW]` block per filter
//!
//! Output channels (or input channels, for the transpose) are computed in
//! parallel with `rayon`. Each channel is reduced on a single thread, so the
//! results do not depend on scheduling.

use rayon::prelude::*;

use super::padding::{Padding, Stride};
use crate::error::{Error, Result};
use crate::tensors::{Matrix, NTensor, Shape, Tensor, TensorOps};

/// Output length along one axis.
///
/// # Errors
///
/// [`Error::InvalidGeometry`] when the stride is zero, the kernel is empty, or
/// the kernel does not fit into the padded input.
///
/// # Example
///
/// ```rust
/// use briny_train::ops::output_dim;
///
/// assert_eq!(output_dim(4, 2, 1, 2).unwrap(), 3);
/// assert_eq!(output_dim(4, 2, 0, 1).unwrap(), 3);
/// assert!(output_dim(1, 4, 1, 1).is_err());
/// ```
pub fn output_dim(input: usize, kernel: usize, pad: usize, stride: usize) -> Result<usize> {
    if stride == 0 {
        return Err(Error::InvalidGeometry("stride must be positive".into()));
    }
    let padded = input + 2 * pad;
    if kernel == 0 || padded < kernel {
        return Err(Error::InvalidGeometry(format!(
            "kernel of size {kernel} does not fit padded input of size {padded}"
        )));
    }
    Ok((padded - kernel) / stride + 1)
}

/// Validated dimensions of one convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Input channels `C`.
    pub channels: usize,
    /// Input height `H`.
    pub height: usize,
    /// Input width `W`.
    pub width: usize,
    /// Filters `F`.
    pub filters: usize,
    /// Kernel height `kH`.
    pub kernel_height: usize,
    /// Kernel width `kW`.
    pub kernel_width: usize,
    /// Output height `H'`.
    pub out_height: usize,
    /// Output width `W'`.
    pub out_width: usize,
    /// Padding on each side.
    pub padding: Padding,
    /// Step between placements.
    pub stride: Stride,
}

impl ConvGeometry {
    /// Checks an input shape `[C, H, W]` against a kernel bank `[F, C, kH, kW]`.
    ///
    /// # Errors
    ///
    /// - [`Error::RankMismatch`] if the ranks are not 3 and 4
    /// - [`Error::ShapeMismatch`] if the channel counts disagree
    /// - [`Error::InvalidGeometry`] if the kernel does not fit
    pub fn new(input: &Shape, kernels: &Shape, padding: Padding, stride: Stride) -> Result<Self> {
        let &[channels, height, width] = input.dims() else {
            return Err(Error::RankMismatch {
                expected: 3,
                got: input.rank(),
            });
        };
        let &[filters, kernel_channels, kernel_height, kernel_width] = kernels.dims() else {
            return Err(Error::RankMismatch {
                expected: 4,
                got: kernels.rank(),
            });
        };
        if kernel_channels != channels {
            return Err(Error::shape_mismatch(
                [filters, channels, kernel_height, kernel_width],
                kernels,
            ));
        }
        stride.validate()?;
        Ok(Self {
            channels,
            height,
            width,
            filters,
            kernel_height,
            kernel_width,
            out_height: output_dim(height, kernel_height, padding.height, stride.height)?,
            out_width: output_dim(width, kernel_width, padding.width, stride.width)?,
            padding,
            stride,
        })
    }

    /// `[F, H', W']`.
    #[must_use]
    pub fn output_shape(&self) -> Shape {
        Shape::new([self.filters, self.out_height, self.out_width])
    }

    /// `[C, H, W]`.
    #[must_use]
    pub fn input_shape(&self) -> Shape {
        Shape::new([self.channels, self.height, self.width])
    }

    /// `[F, C, kH, kW]`.
    #[must_use]
    pub fn kernels_shape(&self) -> Shape {
        Shape::new([
            self.filters,
            self.channels,
            self.kernel_height,
            self.kernel_width,
        ])
    }

    /// Input coordinate read by output cell `(i, j)` at kernel offset `(m, n)`,
    /// before padding resolution.
    #[inline]
    fn source(&self, i: usize, j: usize, m: usize, n: usize) -> (isize, isize) {
        (
            (i * self.stride.height + m) as isize - self.padding.height as isize,
            (j * self.stride.width + n) as isize - self.padding.width as isize,
        )
    }
}

/// Single-channel cross-correlation of `input` with `kernel`.
///
/// # Errors
///
/// [`Error::InvalidGeometry`] if the kernel does not fit or the stride is zero.
pub fn correlate(input: &Matrix, kernel: &Matrix, padding: Padding, stride: Stride) -> Result<Matrix> {
    let geometry = ConvGeometry::new(
        &Shape::new([1, input.rows(), input.cols()]),
        &Shape::new([1, 1, kernel.rows(), kernel.cols()]),
        padding,
        stride,
    )?;
    let mut out = Matrix::zeros(geometry.out_height, geometry.out_width);
    correlate_accumulate(&geometry, input, kernel, &mut out);
    Ok(out)
}

fn correlate_accumulate(geometry: &ConvGeometry, input: &Matrix, kernel: &Matrix, out: &mut Matrix) {
    let mode = geometry.padding.mode;
    for i in 0..geometry.out_height {
        for j in 0..geometry.out_width {
            let mut acc = 0.0;
            for m in 0..geometry.kernel_height {
                for n in 0..geometry.kernel_width {
                    let (r, c) = geometry.source(i, j, m, n);
                    acc += kernel[(m, n)] * mode.sample(input, r, c);
                }
            }
            out[(i, j)] += acc;
        }
    }
}

/// Multi-channel forward convolution, `[C, H, W] ⋆ [F, C, kH, kW] → [F, H', W']`.
///
/// # Errors
///
/// See [`ConvGeometry::new`].
pub fn convolve(input: &NTensor, kernels: &NTensor, padding: Padding, stride: Stride) -> Result<NTensor> {
    let geometry = ConvGeometry::new(&input.shape(), &kernels.shape(), padding, stride)?;
    let mut out = NTensor::zeros(&geometry.output_shape())?;
    convolve_into(&geometry, input, kernels, &mut out)?;
    Ok(out)
}

/// [`convolve`] into a preallocated `[F, H', W']` buffer, overwriting it.
///
/// # Errors
///
/// [`Error::ShapeMismatch`] if any operand disagrees with `geometry`.
pub fn convolve_into(
    geometry: &ConvGeometry,
    input: &NTensor,
    kernels: &NTensor,
    out: &mut NTensor,
) -> Result<()> {
    check(&geometry.input_shape(), input)?;
    check(&geometry.kernels_shape(), kernels)?;
    check(&geometry.output_shape(), out)?;
    out.slices_mut()
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(o, slice)| {
            let acc = slice.downcast_mut::<Matrix>()?;
            acc.fill(0.0);
            for c in 0..geometry.channels {
                correlate_accumulate(geometry, input.matrix_at(&[c])?, kernels.matrix_at(&[o, c])?, acc);
            }
            Ok(())
        })
}

/// The adjoint of [`convolve`]: maps an output delta back to a delta over the
/// input of shape `input_shape`.
///
/// Every `K[o, c, m, n] · D[o, i, j]` is added to the input cell the forward
/// pass read; reads the padding scheme drops are discarded.
///
/// # Errors
///
/// See [`ConvGeometry::new`]; [`Error::ShapeMismatch`] when `delta` does not
/// have the forward output shape.
pub fn convolve_transposed(
    kernels: &NTensor,
    delta: &NTensor,
    input_shape: &Shape,
    padding: Padding,
    stride: Stride,
) -> Result<NTensor> {
    let geometry = ConvGeometry::new(input_shape, &kernels.shape(), padding, stride)?;
    let mut out = NTensor::zeros(input_shape)?;
    convolve_transposed_into(&geometry, kernels, delta, &mut out)?;
    Ok(out)
}

/// [`convolve_transposed`] into a preallocated `[C, H, W]` buffer, overwriting it.
///
/// # Errors
///
/// [`Error::ShapeMismatch`] if any operand disagrees with `geometry`.
pub fn convolve_transposed_into(
    geometry: &ConvGeometry,
    kernels: &NTensor,
    delta: &NTensor,
    out: &mut NTensor,
) -> Result<()> {
    check(&geometry.kernels_shape(), kernels)?;
    check(&geometry.output_shape(), delta)?;
    check(&geometry.input_shape(), out)?;
    let mode = geometry.padding.mode;
    out.slices_mut()
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(c, slice)| {
            let acc = slice.downcast_mut::<Matrix>()?;
            acc.fill(0.0);
            for o in 0..geometry.filters {
                let d = delta.matrix_at(&[o])?;
                let k = kernels.matrix_at(&[o, c])?;
                for i in 0..geometry.out_height {
                    for j in 0..geometry.out_width {
                        let dij = d[(i, j)];
                        for m in 0..geometry.kernel_height {
                            for n in 0..geometry.kernel_width {
                                let (r, s) = geometry.source(i, j, m, n);
                                if let (Some(r), Some(s)) =
                                    (mode.map_index(r, geometry.height), mode.map_index(s, geometry.width))
                                {
                                    acc[(r, s)] += k[(m, n)] * dij;
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        })
}

/// Gradient of the cost with respect to a kernel bank of shape `kernels_shape`.
///
/// # Errors
///
/// See [`ConvGeometry::new`]; [`Error::ShapeMismatch`] when `delta` does not
/// have the forward output shape.
pub fn kernels_gradient(
    kernels_shape: &Shape,
    delta: &NTensor,
    input: &NTensor,
    padding: Padding,
    stride: Stride,
) -> Result<NTensor> {
    let geometry = ConvGeometry::new(&input.shape(), kernels_shape, padding, stride)?;
    let mut out = NTensor::zeros(kernels_shape)?;
    kernels_gradient_into(&geometry, delta, input, &mut out)?;
    Ok(out)
}

/// Adds the kernel gradient into `out` (`[F, C, kH, kW]`) without clearing it.
///
/// # Errors
///
/// [`Error::ShapeMismatch`] if any operand disagrees with `geometry`.
pub fn kernels_gradient_into(
    geometry: &ConvGeometry,
    delta: &NTensor,
    input: &NTensor,
    out: &mut NTensor,
) -> Result<()> {
    check(&geometry.output_shape(), delta)?;
    check(&geometry.input_shape(), input)?;
    check(&geometry.kernels_shape(), out)?;
    let mode = geometry.padding.mode;
    out.slices_mut()
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(o, slice)| {
            let bank = slice.downcast_mut::<NTensor>()?;
            let d = delta.matrix_at(&[o])?;
            for c in 0..geometry.channels {
                let x = input.matrix_at(&[c])?;
                let grad = bank.matrix_at_mut(&[c])?;
                for m in 0..geometry.kernel_height {
                    for n in 0..geometry.kernel_width {
                        let mut acc = 0.0;
                        for i in 0..geometry.out_height {
                            for j in 0..geometry.out_width {
                                let (r, s) = geometry.source(i, j, m, n);
                                acc += d[(i, j)] * mode.sample(x, r, s);
                            }
                        }
                        grad[(m, n)] += acc;
                    }
                }
            }
            Ok(())
        })
}

/// Sums every channel of a `[F, H', W']` delta, giving the per-filter bias gradient.
#[must_use]
pub fn channel_sums(delta: &NTensor) -> Vec<f32> {
    delta.slices().iter().map(Tensor::sum).collect()
}

fn check(expected: &Shape, tensor: &NTensor) -> Result<()> {
    let got = tensor.shape();
    if got == *expected {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: expected.clone(),
            got,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::PaddingMode;

    #[test]
    fn correlation_does_not_flip_the_kernel() {
        let x = Matrix::from([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let k = Matrix::from([[1.0, 0.0], [0.0, -1.0]]);
        let y = correlate(&x, &k, Padding::none(), Stride::default()).unwrap();
        assert_eq!(y.data(), &[-4.0, -4.0, -4.0, -4.0]);
    }

    #[test]
    fn padded_strided_output() {
        let x = Matrix::from([[1.0, 2.0], [3.0, 4.0]]);
        let k = Matrix::from([[1.0]]);
        let pad = Padding::new(PaddingMode::Replication, 1, 1);
        let y = correlate(&x, &k, pad, Stride::new(3, 3)).unwrap();
        // rows -1 and 2 clamp to 0 and 1
        assert_eq!(y, Matrix::from([[1.0, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn channels_must_agree() {
        let x = NTensor::zeros(&Shape::from([2, 3, 3])).unwrap();
        let k = NTensor::zeros(&Shape::from([1, 3, 2, 2])).unwrap();
        assert!(matches!(
            convolve(&x, &k, Padding::none(), Stride::default()),
            Err(Error::ShapeMismatch { .. })
        ));
        let k = NTensor::zeros(&Shape::from([1, 2, 2, 2])).unwrap();
        assert!(matches!(
            convolve(&x, &k, Padding::none(), Stride::new(0, 1)),
            Err(Error::InvalidGeometry(_))
        ));
    }
}
