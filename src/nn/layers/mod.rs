//! The layer protocol.
//!
//! Layers are built in two phases. A configuration value ([`Dense`],
//! [`Convolution`], [`Flatten`]) is cheap to create and knows nothing about
//! its input. [`BuildLayer::initialize`] runs exactly once, against the output
//! shape of the previous layer: it validates the geometry, registers the
//! layer's parameters in the model's arena and returns the built layer.
//!
//! Built layers implement [`Layer`]. The trait is object safe and works on
//! rank-erased [`Tensor`]s; each implementation views its inputs as the
//! concrete rank it expects and fails with
//! [`Error::IncompatibleGenericTensor`](crate::Error::IncompatibleGenericTensor)
//! otherwise.
//!
//! # Operations
//!
//! | operation        | dense              | convolution                   | flatten    |
//! |------------------|--------------------|-------------------------------|------------|
//! | `pre_activation` | `W·x + b`          | `K ⋆ x + b` per channel       | reshape    |
//! | `delta_input`    | `Wᵀ·δ`             | transposed convolution        | reshape    |
//! | `gradients`      | `δ·xᵀ` and `δ`     | kernel gradient, `Σ δ` per channel | none       |

use core::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::Normal;

use super::{Activation, ParamId, Parameters};
use crate::error::{Error, Result};
use crate::grad::GradientReceiver;
use crate::modelio::LayerDescriptor;
use crate::tensors::{Shape, Tensor};

mod conv;
mod dense;
mod flatten;

pub use conv::{Convolution, ConvolutionLayer};
pub use dense::{Dense, DenseLayer};
pub use flatten::{Flatten, FlattenLayer};

/// A built, differentiable layer.
pub trait Layer: fmt::Debug + Send + Sync {
    /// Registry tag of this layer variant.
    fn kind(&self) -> &'static str;

    /// The nonlinearity applied after [`Layer::pre_activation`].
    fn activation(&self) -> Activation;

    /// Shape this layer accepts.
    fn input_shape(&self) -> &Shape;

    /// Shape this layer produces.
    fn output_shape(&self) -> &Shape;

    /// Computes the pre-activation of `input` into `out`, which must already
    /// have the output shape.
    ///
    /// # Errors
    ///
    /// Shape, rank or parameter lookup failures.
    fn pre_activation_into(&self, params: &Parameters, input: &Tensor, out: &mut Tensor) -> Result<()>;

    /// Allocating form of [`Layer::pre_activation_into`].
    ///
    /// # Errors
    ///
    /// See [`Layer::pre_activation_into`].
    fn pre_activation(&self, params: &Parameters, input: &Tensor) -> Result<Tensor> {
        let mut out = Tensor::zeros(self.output_shape())?;
        self.pre_activation_into(params, input, &mut out)?;
        Ok(out)
    }

    /// Carries a delta over this layer's pre-activation back to its input.
    ///
    /// # Errors
    ///
    /// Shape, rank or parameter lookup failures.
    fn delta_input(&self, params: &Parameters, delta: &Tensor, input: &Tensor) -> Result<Tensor>;

    /// Adds this layer's parameter gradients for one sample to `receiver`.
    ///
    /// # Errors
    ///
    /// Shape failures, or [`Error::UnregisteredParameter`] if `receiver` does
    /// not track this layer's parameters.
    fn gradients(
        &self,
        params: &Parameters,
        delta: &Tensor,
        input: &Tensor,
        receiver: &mut GradientReceiver,
    ) -> Result<()>;

    /// Ids of the parameters this layer learns.
    fn learnable(&self) -> Vec<ParamId>;

    /// Snapshot of this layer's configuration and parameter values.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] if `params` is not this layer's arena.
    fn describe(&self, params: &Parameters) -> Result<LayerDescriptor>;
}

/// A layer configuration that can be initialized against an input shape.
pub trait BuildLayer {
    /// The built layer.
    type Layer: Layer + 'static;

    /// Validates `input` against this configuration, registers parameters
    /// and returns the built layer.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`], [`Error::ShapeMismatch`] or
    /// [`Error::InvalidGeometry`] when the configuration does not fit `input`.
    fn initialize(self, input: &Shape, ctx: &mut InitContext<'_>) -> Result<Self::Layer>;
}

/// Type-erased [`BuildLayer`], so a model builder can hold mixed configurations.
pub(crate) trait DynBuild {
    fn initialize_boxed(self: Box<Self>, input: &Shape, ctx: &mut InitContext<'_>) -> Result<Box<dyn Layer>>;
}

impl<B: BuildLayer> DynBuild for B {
    fn initialize_boxed(self: Box<Self>, input: &Shape, ctx: &mut InitContext<'_>) -> Result<Box<dyn Layer>> {
        Ok(Box::new((*self).initialize(input, ctx)?))
    }
}

/// Everything a layer needs while it is being initialized.
pub struct InitContext<'a> {
    /// The model's parameter arena.
    pub params: &'a mut Parameters,
    /// Source of initial weights.
    pub rng: &'a mut StdRng,
}

impl InitContext<'_> {
    /// Registers a tensor of `shape` drawn from `N(0, std_dev²)`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `std_dev` is not a valid deviation.
    pub fn register_normal(&mut self, shape: &Shape, std_dev: f32) -> Result<ParamId> {
        let normal = Normal::new(0.0, std_dev).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let rng = &mut *self.rng;
        let data = (0..shape.size()).map(|_| rng.sample(normal)).collect();
        Ok(self.params.register(Tensor::from_flat(shape, data)?))
    }

    /// Registers a zero tensor of `shape`.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] for a rank-0 shape.
    pub fn register_zeros(&mut self, shape: &Shape) -> Result<ParamId> {
        Ok(self.params.register(Tensor::zeros(shape)?))
    }

    /// Registers `data` as a tensor of `shape`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `data` does not fill `shape` exactly.
    pub fn register_values(&mut self, shape: &Shape, data: Vec<f32>) -> Result<ParamId> {
        Ok(self.params.register(Tensor::from_flat(shape, data)?))
    }

    /// Registers weights and bias, either from `initial` or freshly sampled
    /// (normal weights with `std_dev`, zero bias).
    pub(crate) fn register_pair(
        &mut self,
        weights: &Shape,
        bias: &Shape,
        initial: Option<InitialValues>,
        std_dev: f32,
    ) -> Result<(ParamId, ParamId)> {
        match initial {
            Some(values) => Ok((
                self.register_values(weights, values.weights)?,
                self.register_values(bias, values.bias)?,
            )),
            None => Ok((
                self.register_normal(weights, std_dev)?,
                self.register_zeros(bias)?,
            )),
        }
    }
}

/// Row-major parameter values supplied instead of random initialization.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct InitialValues {
    pub(crate) weights: Vec<f32>,
    pub(crate) bias: Vec<f32>,
}

/// Standard deviation of the initial weights: He for rectifiers, Xavier
/// (Glorot normal) otherwise.
#[must_use]
pub fn initial_std(activation: Activation, fan_in: usize, fan_out: usize) -> f32 {
    if activation.is_rectifier() {
        (2.0 / fan_in as f32).sqrt()
    } else {
        (2.0 / (fan_in + fan_out) as f32).sqrt()
    }
}

/// Fails with [`Error::InvalidGeometry`] for a layer input without elements.
fn ensure_nonempty(kind: &str, input: &Shape) -> Result<()> {
    if input.size() == 0 {
        return Err(Error::InvalidGeometry(format!(
            "{kind} layer cannot take an empty input {input}"
        )));
    }
    Ok(())
}
