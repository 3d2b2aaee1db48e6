use super::{BuildLayer, InitContext, InitialValues, Layer, ensure_nonempty, initial_std};
use crate::error::{Error, Result};
use crate::grad::GradientReceiver;
use crate::modelio::LayerDescriptor;
use crate::nn::{Activation, ParamId, Parameters};
use crate::tensors::{Matrix, Shape, Tensor, TensorOps, Vector};

/// Fully connected layer configuration: `units` outputs, each a weighted sum
/// of every input plus a bias.
///
/// # Example
///
/// ```rust
/// use briny_train::nn::{Activation, Dense, Model};
///
/// let model = Model::builder([4])
///     .layer(Dense::new(2, Activation::Logistic))
///     .layer(Dense::new(1, Activation::Linear))
///     .seed(7)
///     .build()
///     .unwrap();
/// assert_eq!(model.output_shape().dims(), &[1]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    units: usize,
    activation: Activation,
    initial: Option<InitialValues>,
}

impl Dense {
    /// A layer with `units` outputs and randomly initialized weights.
    #[must_use]
    pub fn new(units: usize, activation: Activation) -> Self {
        Self {
            units,
            activation,
            initial: None,
        }
    }

    /// A layer with the given `[units, inputs]` weights and `[units]` bias.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the bias length differs from the number
    /// of weight rows.
    pub fn with_parameters(weights: Matrix, bias: Vector, activation: Activation) -> Result<Self> {
        if bias.len() != weights.rows() {
            return Err(Error::shape_mismatch([weights.rows()], bias.shape()));
        }
        Ok(Self {
            units: weights.rows(),
            activation,
            initial: Some(InitialValues {
                weights: weights.into_inner(),
                bias: bias.into_inner(),
            }),
        })
    }

    pub(crate) fn from_flat(units: usize, activation: Activation, weights: Vec<f32>, bias: Vec<f32>) -> Self {
        Self {
            units,
            activation,
            initial: Some(InitialValues { weights, bias }),
        }
    }
}

impl BuildLayer for Dense {
    type Layer = DenseLayer;

    fn initialize(self, input: &Shape, ctx: &mut InitContext<'_>) -> Result<DenseLayer> {
        if input.rank() != 1 {
            return Err(Error::RankMismatch {
                expected: 1,
                got: input.rank(),
            });
        }
        ensure_nonempty("dense", input)?;
        if self.units == 0 {
            return Err(Error::InvalidGeometry("dense layer needs at least one unit".into()));
        }
        let inputs = input.size();
        let weights_shape = Shape::new([self.units, inputs]);
        let output_shape = Shape::new([self.units]);
        let std_dev = initial_std(self.activation, inputs, self.units);
        let (weights, bias) = ctx.register_pair(&weights_shape, &output_shape, self.initial, std_dev)?;
        Ok(DenseLayer {
            activation: self.activation,
            input_shape: input.clone(),
            output_shape,
            weights_shape,
            weights,
            bias,
        })
    }
}

/// A built [`Dense`] layer.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    activation: Activation,
    input_shape: Shape,
    output_shape: Shape,
    weights_shape: Shape,
    weights: ParamId,
    bias: ParamId,
}

impl DenseLayer {
    /// Id of the `[units, inputs]` weight matrix.
    #[must_use]
    pub const fn weights(&self) -> ParamId {
        self.weights
    }

    /// Id of the `[units]` bias.
    #[must_use]
    pub const fn bias(&self) -> ParamId {
        self.bias
    }

    fn weight_matrix<'p>(&self, params: &'p Parameters) -> Result<&'p Matrix> {
        params.get(self.weights)?.view::<Matrix>(&self.weights_shape)
    }
}

impl Layer for DenseLayer {
    fn kind(&self) -> &'static str {
        "dense"
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
        let w = self.weight_matrix(params)?;
        let b = params.get(self.bias)?.view::<Vector>(&self.output_shape)?;
        let x = input.view::<Vector>(&self.input_shape)?;
        let out = out.view_mut::<Vector>(&self.output_shape)?;
        for (i, z) in out.data_mut().iter_mut().enumerate() {
            *z = w.row(i).iter().zip(x).map(|(w, x)| w * x).sum::<f32>() + b[i];
        }
        Ok(())
    }

    fn delta_input(&self, params: &Parameters, delta: &Tensor, _input: &Tensor) -> Result<Tensor> {
        let d = delta.view::<Vector>(&self.output_shape)?;
        Ok(self.weight_matrix(params)?.transpose_times_vector(d)?.into())
    }

    fn gradients(
        &self,
        _params: &Parameters,
        delta: &Tensor,
        input: &Tensor,
        receiver: &mut GradientReceiver,
    ) -> Result<()> {
        let d = delta.view::<Vector>(&self.output_shape)?;
        let x = input.view::<Vector>(&self.input_shape)?;
        receiver
            .accumulator_mut(self.weights)?
            .view_mut::<Matrix>(&self.weights_shape)?
            .add_outer(d, x)?;
        receiver
            .accumulator_mut(self.bias)?
            .view_mut::<Vector>(&self.output_shape)?
            .plus_assign(d)
    }

    fn learnable(&self) -> Vec<ParamId> {
        vec![self.weights, self.bias]
    }

    fn describe(&self, params: &Parameters) -> Result<LayerDescriptor> {
        Ok(LayerDescriptor {
            kind: self.kind().to_owned(),
            activation: self.activation.to_string(),
            dims: self.output_shape.dims().to_vec(),
            weights: params.get(self.weights)?.flatten().into_inner(),
            bias: params.get(self.bias)?.flatten().into_inner(),
            padding: None,
            stride: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn build(config: Dense, input: &[usize]) -> Result<(DenseLayer, Parameters)> {
        let mut params = Parameters::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = InitContext {
            params: &mut params,
            rng: &mut rng,
        };
        let layer = config.initialize(&Shape::from(input), &mut ctx)?;
        Ok((layer, params))
    }

    #[test]
    fn affine_forward_and_backward() {
        let w = Matrix::from([[1.0, 2.0, 3.0], [0.0, -1.0, 1.0]]);
        let b = Vector::from([0.5, -0.5]);
        let config = Dense::with_parameters(w, b, Activation::Linear).unwrap();
        let (layer, params) = build(config, &[3]).unwrap();
        let x = Tensor::from([1.0, 1.0, 2.0]);
        let z = layer.pre_activation(&params, &x).unwrap();
        assert_eq!(z, Tensor::from([9.5, 0.5]));

        let d = Tensor::from([1.0, 2.0]);
        let dx = layer.delta_input(&params, &d, &x).unwrap();
        assert_eq!(dx, Tensor::from([1.0, 0.0, 5.0]));
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(
            build(Dense::new(2, Activation::ReLU), &[2, 2]),
            Err(Error::RankMismatch { .. })
        ));
        assert!(matches!(
            build(Dense::new(0, Activation::ReLU), &[2]),
            Err(Error::InvalidGeometry(_))
        ));
        let config = Dense::with_parameters(Matrix::zeros(2, 3), Vector::zeros(2), Activation::ReLU).unwrap();
        assert!(matches!(build(config, &[4]), Err(Error::ShapeMismatch { .. })));
    }
}
