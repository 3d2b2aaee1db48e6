//! Per-sample forward and reverse passes.
//!
//! # Back Propagation
//!
//! A [`BackPropagator`] runs one forward pass over a [`Model`], caching every
//! layer's pre-activation `z` and activation `a`, then walks the layers in
//! reverse:
//!
//! 1. seed `δa = cost'(target, a_last)`
//! 2. `δz = δa ⊙ f'(z)`, except for a Softmax output trained with
//!    cross-entropy, where the cost derivative already is `δz`
//! 3. the layer adds its parameter gradients to a [`GradientReceiver`]
//! 4. unless this is the first layer, `δa = layer.delta_input(δz)`
//!
//! The cached buffers are allocated once, sized for one model, and reused for
//! every sample. A propagator is therefore not shared between threads; the
//! [`GradientComputer`](crate::grad::GradientComputer) keeps one per worker.

use crate::error::{Error, Result};
use crate::grad::GradientReceiver;
use crate::nn::{Cost, Model, Sample};
use crate::tensors::{Tensor, TensorOps};

/// Reusable forward/backward scratch for one model and cost.
#[derive(Debug, Clone)]
pub struct BackPropagator {
    cost: Cost,
    pre_activations: Vec<Tensor>,
    activations: Vec<Tensor>,
}

impl BackPropagator {
    /// Allocates scratch for every layer of `model`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a model without layers.
    pub fn new(model: &Model, cost: Cost) -> Result<Self> {
        if model.layers().is_empty() {
            return Err(Error::InvalidConfig("cannot back propagate through an empty model".into()));
        }
        let pre_activations = model
            .layers()
            .iter()
            .map(|layer| Tensor::zeros(layer.output_shape()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cost,
            activations: pre_activations.clone(),
            pre_activations,
        })
    }

    /// The cost being differentiated.
    #[must_use]
    pub const fn cost(&self) -> Cost {
        self.cost
    }

    /// Runs a forward pass and returns the final activation.
    ///
    /// The result borrows the propagator's scratch and is overwritten by the
    /// next call.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `input` does not have the model's input shape.
    pub fn forward(&mut self, model: &Model, input: &Tensor) -> Result<&Tensor> {
        self.ensure_model(model)?;
        input.expect_shape(model.input_shape())?;
        self.run_forward(model, input)?;
        self.activations
            .last()
            .ok_or_else(|| Error::InvalidConfig("model has no layers".into()))
    }

    /// Runs both passes for `sample`, adding its gradients to `receiver`.
    /// Returns the sample's cost.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] before any computation when the sample does
    /// not fit the model, [`Error::UnregisteredParameter`] when `receiver`
    /// lacks one of the model's parameters.
    pub fn backpropagate(
        &mut self,
        model: &Model,
        sample: &Sample,
        receiver: &mut GradientReceiver,
    ) -> Result<f32> {
        self.ensure_model(model)?;
        sample.input.expect_shape(model.input_shape())?;
        sample.target.expect_shape(model.output_shape())?;

        self.run_forward(model, &sample.input)?;

        let layers = model.layers();
        let params = model.parameters();
        let last = layers.len() - 1;
        let output = &self.activations[last];
        let loss = self.cost.compute(&sample.target, output)?;
        let mut delta = self.cost.derivative(&sample.target, output)?;
        let combined = model.is_softmax_cross_entropy(self.cost);

        for (idx, layer) in layers.iter().enumerate().rev() {
            if !(combined && idx == last) {
                layer
                    .activation()
                    .backprop_assign(&self.pre_activations[idx], &mut delta)?;
            }
            let input = if idx == 0 {
                &sample.input
            } else {
                &self.activations[idx - 1]
            };
            layer.gradients(params, &delta, input, receiver)?;
            if idx > 0 {
                delta = layer.delta_input(params, &delta, input)?;
            }
        }
        Ok(loss)
    }

    fn run_forward(&mut self, model: &Model, input: &Tensor) -> Result<()> {
        let params = model.parameters();
        for (idx, layer) in model.layers().iter().enumerate() {
            let (done, rest) = self.activations.split_at_mut(idx);
            let layer_input = if idx == 0 { input } else { &done[idx - 1] };
            let z = &mut self.pre_activations[idx];
            layer.pre_activation_into(params, layer_input, z)?;
            layer.activation().compute_into(z, &mut rest[0])?;
        }
        Ok(())
    }

    fn ensure_model(&self, model: &Model) -> Result<()> {
        let fits = self.activations.len() == model.layers().len()
            && self
                .activations
                .iter()
                .zip(model.layers())
                .all(|(a, layer)| a.shape() == *layer.output_shape());
        if fits {
            Ok(())
        } else {
            Err(Error::InvalidConfig(
                "back propagator was allocated for a different model".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Dense};
    use crate::tensors::{Matrix, Vector};

    #[test]
    fn linear_layer_gradients_by_hand() {
        let model = Model::builder([2])
            .layer(
                Dense::with_parameters(
                    Matrix::from([[1.0, -1.0]]),
                    Vector::from([0.0]),
                    Activation::Linear,
                )
                .unwrap(),
            )
            .build()
            .unwrap();
        let mut bp = BackPropagator::new(&model, Cost::MeanSquaredError).unwrap();
        let mut receiver = GradientReceiver::for_model(&model).unwrap();
        // z = 3 - 1 = 2, target 0: δ = 2
        let loss = bp
            .backpropagate(&model, &Sample::new([3.0, 1.0], [0.0]), &mut receiver)
            .unwrap();
        assert_eq!(loss, 2.0);
        let [w, b] = [model.learnable()[0], model.learnable()[1]];
        assert_eq!(receiver.get(w).unwrap(), &Tensor::from([[6.0, 2.0]]));
        assert_eq!(receiver.get(b).unwrap(), &Tensor::from([2.0]));
    }

    #[test]
    fn sample_shapes_are_checked_first() {
        let model = Model::builder([2])
            .layer(Dense::new(1, Activation::Linear))
            .seed(0)
            .build()
            .unwrap();
        let mut bp = BackPropagator::new(&model, Cost::MeanSquaredError).unwrap();
        let mut receiver = GradientReceiver::for_model(&model).unwrap();
        let bad_target = Sample::new([1.0, 2.0], [1.0, 2.0]);
        assert!(matches!(
            bp.backpropagate(&model, &bad_target, &mut receiver),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(receiver.iter().all(|(_, g)| g.flatten().iter().all(|&x| x == 0.0)));
    }
}
