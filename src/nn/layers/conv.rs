use super::{BuildLayer, InitContext, InitialValues, Layer, ensure_nonempty, initial_std};
use crate::error::{Error, Result};
use crate::grad::GradientReceiver;
use crate::modelio::{LayerDescriptor, PaddingDescriptor};
use crate::nn::{Activation, ParamId, Parameters};
use crate::ops::{
    ConvGeometry, Padding, Stride, channel_sums, convolve_into, convolve_transposed_into,
    kernels_gradient_into,
};
use crate::tensors::{NTensor, Shape, Tensor, TensorOps, Vector};

/// 2D convolution configuration over `[C, H, W]` inputs.
///
/// Produces `filters` output channels. Each filter holds one `kH × kW` kernel
/// per input channel plus a single bias shared across its output channel.
///
/// # Example
///
/// ```rust
/// use briny_train::nn::{Activation, Convolution, Flatten, Model};
/// use briny_train::ops::{Padding, PaddingMode, Stride};
///
/// let model = Model::builder([1, 6, 6])
///     .layer(
///         Convolution::new(4, 3, 3, Activation::ReLU)
///             .with_padding(Padding::new(PaddingMode::Reflection, 1, 1))
///             .with_stride(Stride::new(2, 2)),
///     )
///     .layer(Flatten::new())
///     .build()
///     .unwrap();
/// assert_eq!(model.output_shape().dims(), &[4 * 3 * 3]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Convolution {
    filters: usize,
    kernel_height: usize,
    kernel_width: usize,
    activation: Activation,
    padding: Padding,
    stride: Stride,
    initial: Option<InitialValues>,
}

impl Convolution {
    /// `filters` kernels of `kernel_height × kernel_width`, no padding, unit stride.
    #[must_use]
    pub fn new(filters: usize, kernel_height: usize, kernel_width: usize, activation: Activation) -> Self {
        Self {
            filters,
            kernel_height,
            kernel_width,
            activation,
            padding: Padding::none(),
            stride: Stride::default(),
            initial: None,
        }
    }

    /// Uses the given `[F, C, kH, kW]` kernels and `[F]` bias.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] unless the kernels are rank 4,
    /// [`Error::ShapeMismatch`] if the bias length is not `F`.
    pub fn with_parameters(kernels: NTensor, bias: Vector, activation: Activation) -> Result<Self> {
        let shape = kernels.shape();
        let &[filters, _, kernel_height, kernel_width] = shape.dims() else {
            return Err(Error::RankMismatch {
                expected: 4,
                got: shape.rank(),
            });
        };
        if bias.len() != filters {
            return Err(Error::shape_mismatch([filters], bias.shape()));
        }
        Ok(Self {
            filters,
            kernel_height,
            kernel_width,
            activation,
            padding: Padding::none(),
            stride: Stride::default(),
            initial: Some(InitialValues {
                weights: kernels.flatten().into_inner(),
                bias: bias.into_inner(),
            }),
        })
    }

    pub(crate) fn with_flat_parameters(mut self, weights: Vec<f32>, bias: Vec<f32>) -> Self {
        self.initial = Some(InitialValues { weights, bias });
        self
    }

    /// Sets the padding.
    #[must_use]
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the stride.
    #[must_use]
    pub fn with_stride(mut self, stride: Stride) -> Self {
        self.stride = stride;
        self
    }
}

impl BuildLayer for Convolution {
    type Layer = ConvolutionLayer;

    fn initialize(self, input: &Shape, ctx: &mut InitContext<'_>) -> Result<ConvolutionLayer> {
        let &[channels, _, _] = input.dims() else {
            return Err(Error::RankMismatch {
                expected: 3,
                got: input.rank(),
            });
        };
        ensure_nonempty("convolution", input)?;
        if self.filters == 0 {
            return Err(Error::InvalidGeometry("convolution needs at least one filter".into()));
        }
        let kernels_shape = Shape::new([self.filters, channels, self.kernel_height, self.kernel_width]);
        let geometry = ConvGeometry::new(input, &kernels_shape, self.padding, self.stride)?;
        let receptive = self.kernel_height * self.kernel_width;
        let std_dev = initial_std(self.activation, channels * receptive, self.filters * receptive);
        let bias_shape = Shape::new([self.filters]);
        let (kernels, bias) = ctx.register_pair(&kernels_shape, &bias_shape, self.initial, std_dev)?;
        Ok(ConvolutionLayer {
            activation: self.activation,
            input_shape: geometry.input_shape(),
            output_shape: geometry.output_shape(),
            kernels_shape,
            bias_shape,
            geometry,
            kernels,
            bias,
        })
    }
}

/// A built [`Convolution`] layer.
#[derive(Debug, Clone)]
pub struct ConvolutionLayer {
    activation: Activation,
    geometry: ConvGeometry,
    input_shape: Shape,
    output_shape: Shape,
    kernels_shape: Shape,
    bias_shape: Shape,
    kernels: ParamId,
    bias: ParamId,
}

impl ConvolutionLayer {
    /// Id of the `[F, C, kH, kW]` kernel bank.
    #[must_use]
    pub const fn kernels(&self) -> ParamId {
        self.kernels
    }

    /// Id of the `[F]` bias.
    #[must_use]
    pub const fn bias(&self) -> ParamId {
        self.bias
    }

    /// The validated convolution geometry.
    #[must_use]
    pub const fn geometry(&self) -> &ConvGeometry {
        &self.geometry
    }

    fn kernel_bank<'p>(&self, params: &'p Parameters) -> Result<&'p NTensor> {
        params.get(self.kernels)?.view::<NTensor>(&self.kernels_shape)
    }
}

impl Layer for ConvolutionLayer {
    fn kind(&self) -> &'static str {
        "convolution"
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    fn pre_activation_into(&self, params: &Parameters, input: &Tensor, out: &mut Tensor) -> Result<()> {
        let x = input.view::<NTensor>(&self.input_shape)?;
        let bias = params.get(self.bias)?.view::<Vector>(&self.bias_shape)?;
        let out = out.view_mut::<NTensor>(&self.output_shape)?;
        convolve_into(&self.geometry, x, self.kernel_bank(params)?, out)?;
        for (channel, &b) in out.slices_mut().iter_mut().zip(bias) {
            channel.map_assign(|z| z + b);
        }
        Ok(())
    }

    fn delta_input(&self, params: &Parameters, delta: &Tensor, _input: &Tensor) -> Result<Tensor> {
        let d = delta.view::<NTensor>(&self.output_shape)?;
        let mut dx = NTensor::zeros(&self.input_shape)?;
        convolve_transposed_into(&self.geometry, self.kernel_bank(params)?, d, &mut dx)?;
        Ok(dx.into())
    }

    fn gradients(
        &self,
        _params: &Parameters,
        delta: &Tensor,
        input: &Tensor,
        receiver: &mut GradientReceiver,
    ) -> Result<()> {
        let d = delta.view::<NTensor>(&self.output_shape)?;
        let x = input.view::<NTensor>(&self.input_shape)?;
        let dk = receiver
            .accumulator_mut(self.kernels)?
            .view_mut::<NTensor>(&self.kernels_shape)?;
        kernels_gradient_into(&self.geometry, d, x, dk)?;
        receiver
            .accumulator_mut(self.bias)?
            .view_mut::<Vector>(&self.bias_shape)?
            .plus_assign(&Vector::new(channel_sums(d)))
    }

    fn learnable(&self) -> Vec<ParamId> {
        vec![self.kernels, self.bias]
    }

    fn describe(&self, params: &Parameters) -> Result<LayerDescriptor> {
        let padding = self.geometry.padding;
        let stride = self.geometry.stride;
        Ok(LayerDescriptor {
            kind: self.kind().to_owned(),
            activation: self.activation.to_string(),
            dims: vec![
                self.geometry.filters,
                self.geometry.kernel_height,
                self.geometry.kernel_width,
            ],
            weights: params.get(self.kernels)?.flatten().into_inner(),
            bias: params.get(self.bias)?.flatten().into_inner(),
            padding: Some(PaddingDescriptor {
                mode: padding.mode.to_string(),
                height: padding.height,
                width: padding.width,
            }),
            stride: Some((stride.height, stride.width)),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::ops::PaddingMode;

    #[test]
    fn bias_is_per_channel() {
        let kernels = NTensor::from_slices(vec![
            NTensor::from([[[1.0]]]).into(),
            NTensor::from([[[2.0]]]).into(),
        ])
        .unwrap();
        let config = Convolution::with_parameters(kernels, Vector::from([0.5, -1.0]), Activation::Linear)
            .unwrap()
            .with_padding(Padding::new(PaddingMode::Zero, 0, 0));
        let mut params = Parameters::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = InitContext {
            params: &mut params,
            rng: &mut rng,
        };
        let layer = config.initialize(&Shape::from([1, 1, 2]), &mut ctx).unwrap();
        let z = layer
            .pre_activation(&params, &Tensor::from([[[1.0, 2.0]]]))
            .unwrap();
        assert_eq!(z, Tensor::from([[[1.5, 2.5]], [[1.0, 3.0]]]));
    }

    #[test]
    fn matrix_input_is_rejected() {
        let mut params = Parameters::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = InitContext {
            params: &mut params,
            rng: &mut rng,
        };
        assert!(matches!(
            Convolution::new(1, 2, 2, Activation::ReLU).initialize(&Shape::from([4, 4]), &mut ctx),
            Err(Error::RankMismatch { expected: 3, got: 2 })
        ));
    }
}
