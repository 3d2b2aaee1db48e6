use super::{BuildLayer, InitContext, Layer};
use crate::error::Result;
use crate::grad::GradientReceiver;
use crate::modelio::LayerDescriptor;
use crate::nn::{Activation, ParamId, Parameters};
use crate::tensors::{Shape, Tensor, TensorOps, Vector};

/// Reshapes any input into a vector, row-major. Has no parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flatten {
    activation: Activation,
}

impl Flatten {
    /// A flatten layer with a linear activation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            activation: Activation::Linear,
        }
    }

    /// Applies `activation` to the flattened values.
    #[must_use]
    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

impl BuildLayer for Flatten {
    type Layer = FlattenLayer;

    fn initialize(self, input: &Shape, _ctx: &mut InitContext<'_>) -> Result<FlattenLayer> {
        Ok(FlattenLayer {
            activation: self.activation,
            input_shape: input.clone(),
            output_shape: Shape::new([input.size()]),
        })
    }
}

/// A built [`Flatten`] layer.
#[derive(Debug, Clone)]
pub struct FlattenLayer {
    activation: Activation,
    input_shape: Shape,
    output_shape: Shape,
}

impl Layer for FlattenLayer {
    fn kind(&self) -> &'static str {
        "flatten"
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

    fn pre_activation_into(&self, _params: &Parameters, input: &Tensor, out: &mut Tensor) -> Result<()> {
        input.expect_shape(&self.input_shape)?;
        let out = out.view_mut::<Vector>(&self.output_shape)?;
        let mut cells = out.data_mut().iter_mut();
        input.for_each_element(&mut |x| {
            if let Some(cell) = cells.next() {
                *cell = x;
            }
        });
        Ok(())
    }

    fn delta_input(&self, _params: &Parameters, delta: &Tensor, _input: &Tensor) -> Result<Tensor> {
        delta.expect_shape(&self.output_shape)?;
        delta.reshape(&self.input_shape)
    }

    fn gradients(
        &self,
        _params: &Parameters,
        _delta: &Tensor,
        _input: &Tensor,
        _receiver: &mut GradientReceiver,
    ) -> Result<()> {
        Ok(())
    }

    fn learnable(&self) -> Vec<ParamId> {
        Vec::new()
    }

    fn describe(&self, _params: &Parameters) -> Result<LayerDescriptor> {
        Ok(LayerDescriptor {
            kind: self.kind().to_owned(),
            activation: self.activation.to_string(),
            dims: Vec::new(),
            weights: Vec::new(),
            bias: Vec::new(),
            padding: None,
            stride: None,
        })
    }
}
