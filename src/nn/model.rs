use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::layers::{BuildLayer, DynBuild, InitContext, Layer};
use super::{Activation, Cost, ParamId, Parameters};
use crate::error::{Error, Result};
use crate::tensors::{Shape, Tensor};

/// One training example: an input and the output it should produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Fed to the first layer; must have the model's input shape.
    pub input: Tensor,
    /// Compared with the last layer's activation; must have the model's output shape.
    pub target: Tensor,
}

impl Sample {
    /// Pairs an input with its target.
    pub fn new(input: impl Into<Tensor>, target: impl Into<Tensor>) -> Self {
        Self {
            input: input.into(),
            target: target.into(),
        }
    }
}

/// An ordered stack of built layers and the parameters they learn.
///
/// The topology is fixed once built. Parameter values change through
/// [`Model::parameters_mut`], normally from an optimizer.
#[derive(Debug)]
pub struct Model {
    input_shape: Shape,
    layers: Vec<Box<dyn Layer>>,
    params: Parameters,
}

impl Model {
    /// Starts a model taking inputs of `input_shape`.
    pub fn builder(input_shape: impl Into<Shape>) -> ModelBuilder {
        ModelBuilder {
            input_shape: input_shape.into(),
            layers: Vec::new(),
            seed: None,
        }
    }

    /// Shape of the inputs.
    #[must_use]
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Shape of the last layer's activation.
    #[must_use]
    pub fn output_shape(&self) -> &Shape {
        self.layers
            .last()
            .map_or(&self.input_shape, |layer| layer.output_shape())
    }

    /// The layers, first to last.
    #[must_use]
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// The parameter arena.
    #[must_use]
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Mutable access to parameter values.
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Ids of every learnable parameter, first layer first.
    #[must_use]
    pub fn learnable(&self) -> Vec<ParamId> {
        self.layers.iter().flat_map(|layer| layer.learnable()).collect()
    }

    /// Runs a forward pass and returns the final activation.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `input` does not have the input shape.
    pub fn predict(&self, input: &Tensor) -> Result<Tensor> {
        input.expect_shape(&self.input_shape)?;
        let mut activation = input.clone();
        for layer in &self.layers {
            let z = layer.pre_activation(&self.params, &activation)?;
            activation = layer.activation().compute(&z);
        }
        Ok(activation)
    }

    /// Mean `cost` over `samples`; zero when there are none.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] for a sample that does not fit the model.
    pub fn loss(&self, samples: &[Sample], cost: Cost) -> Result<f32> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for sample in samples {
            sample.target.expect_shape(self.output_shape())?;
            total += cost.compute(&sample.target, &self.predict(&sample.input)?)?;
        }
        Ok(total / samples.len() as f32)
    }

    /// Whether the output layer is Softmax and `cost` is cross-entropy, the
    /// pair whose combined derivative is `actual - target`.
    #[must_use]
    pub fn is_softmax_cross_entropy(&self, cost: Cost) -> bool {
        cost == Cost::CrossEntropy && self.output_activation() == Some(Activation::Softmax)
    }

    /// Logs a warning when Softmax and cross-entropy are not used together.
    ///
    /// Training still proceeds: Softmax then backpropagates through the
    /// diagonal of its Jacobian only, and cross-entropy's `actual - target`
    /// is no longer the exact gradient.
    pub fn warn_on_mispairing(&self, cost: Cost) {
        let output = self.output_activation();
        if output == Some(Activation::Softmax) && cost != Cost::CrossEntropy {
            warn!("softmax output trained with {cost}; gradients will be approximate");
        } else if cost == Cost::CrossEntropy && output != Some(Activation::Softmax) {
            warn!(
                "cross-entropy used with a {} output; gradients will be approximate",
                output.unwrap_or_default()
            );
        }
    }

    fn output_activation(&self) -> Option<Activation> {
        self.layers.last().map(|layer| layer.activation())
    }
}

/// Collects layer configurations and initializes them in order.
pub struct ModelBuilder {
    input_shape: Shape,
    layers: Vec<Box<dyn DynBuild>>,
    seed: Option<u64>,
}

impl ModelBuilder {
    /// Appends a layer.
    #[must_use]
    pub fn layer(mut self, layer: impl BuildLayer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Seeds weight initialization, making the built model reproducible.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Initializes every layer against its predecessor's output shape.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] without layers or with a rank-0 input, or the
    /// first initialization error of any layer.
    pub fn build(self) -> Result<Model> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig("a model needs at least one layer".into()));
        }
        if self.input_shape.rank() == 0 {
            return Err(Error::InvalidConfig("model input shape has no dimensions".into()));
        }
        if self.input_shape.dims().contains(&0) {
            return Err(Error::InvalidGeometry(format!(
                "model input shape {} has a zero dimension",
                self.input_shape
            )));
        }
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut params = Parameters::new();
        let mut ctx = InitContext {
            params: &mut params,
            rng: &mut rng,
        };
        let mut shape = self.input_shape.clone();
        let mut layers = Vec::with_capacity(self.layers.len());
        for config in self.layers {
            let layer = config.initialize_boxed(&shape, &mut ctx)?;
            shape = layer.output_shape().clone();
            layers.push(layer);
        }
        debug!(
            "built model {} -> {} ({} layers, {} parameters)",
            self.input_shape,
            shape,
            layers.len(),
            params.scalar_count()
        );
        Ok(Model {
            input_shape: self.input_shape,
            layers,
            params,
        })
    }
}

impl core::fmt::Debug for ModelBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModelBuilder")
            .field("input_shape", &self.input_shape)
            .field("layers", &self.layers.len())
            .field("seed", &self.seed)
            .finish()
    }
}
