//! Activation functions.
//!
//! Activations are stateless. Every variant except [`Activation::Softmax`] is
//! elementwise. Softmax normalizes over the whole tensor (after subtracting the
//! maximum for numerical stability), which is why it is normally paired with
//! [`Cost::CrossEntropy`](super::Cost::CrossEntropy): the pair's combined
//! derivative collapses to `actual - target` and the back propagator skips the
//! activation derivative for it.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::tensors::{Tensor, TensorOps};

/// Slope of [`Activation::LeakyReLU`] for negative inputs.
pub const LEAKY_RELU_SLOPE: f32 = 0.01;

/// Nonlinearity applied to a layer's pre-activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    /// `max(0, x)`.
    ReLU,
    /// `x` for positive inputs, `0.01·x` otherwise.
    LeakyReLU,
    /// `1 / (1 + e^-x)`.
    Logistic,
    /// Identity.
    #[default]
    Linear,
    /// `e^x / Σ e^x` over the whole tensor.
    Softmax,
}

impl Activation {
    /// Every variant, in registry order.
    pub const ALL: [Self; 5] = [
        Self::ReLU,
        Self::LeakyReLU,
        Self::Logistic,
        Self::Linear,
        Self::Softmax,
    ];

    /// Applies the activation to a pre-activation `z`.
    #[must_use]
    pub fn compute(self, z: &Tensor) -> Tensor {
        let mut out = z.clone();
        self.apply_in_place(&mut out);
        out
    }

    /// Writes the activation of `z` into `out`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `out` does not have the shape of `z`.
    pub fn compute_into(self, z: &Tensor, out: &mut Tensor) -> Result<()> {
        out.zip_assign(z, |_, z| z)?;
        self.apply_in_place(out);
        Ok(())
    }

    fn apply_in_place(self, t: &mut Tensor) {
        match self {
            Self::Softmax => {
                // an empty tensor has nothing to normalize
                let Ok(max) = t.max() else { return };
                t.map_assign(|x| (x - max).exp());
                let total = t.sum();
                t.div_assign(total);
            }
            act => t.map_assign(|x| act.scalar(x)),
        }
    }

    #[inline]
    fn scalar(self, x: f32) -> f32 {
        match self {
            Self::ReLU => x.max(0.0),
            Self::LeakyReLU => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_RELU_SLOPE * x
                }
            }
            Self::Logistic => logistic(x),
            Self::Linear | Self::Softmax => x,
        }
    }

    /// The derivative evaluated at the pre-activation `z`.
    ///
    /// For Softmax this is the diagonal of the Jacobian, `s·(1 - s)`. The full
    /// Jacobian is never needed when Softmax feeds a cross-entropy cost.
    #[must_use]
    pub fn derivative(self, z: &Tensor) -> Tensor {
        match self {
            Self::Softmax => Self::Softmax.compute(z).map(|s| s * (1.0 - s)),
            act => z.map(|x| act.scalar_derivative(x)),
        }
    }

    #[inline]
    fn scalar_derivative(self, x: f32) -> f32 {
        match self {
            Self::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_RELU_SLOPE
                }
            }
            Self::Logistic => {
                let s = logistic(x);
                s * (1.0 - s)
            }
            Self::Linear | Self::Softmax => 1.0,
        }
    }

    /// Turns a delta over the activation into a delta over the pre-activation
    /// `z`, in place: `delta ⊙ f'(z)`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `delta` and `z` differ in shape.
    pub fn backprop_assign(self, z: &Tensor, delta: &mut Tensor) -> Result<()> {
        match self {
            Self::Linear => delta.ensure_same_shape(z),
            Self::Softmax => delta.hadamard_assign(&self.derivative(z)),
            act => delta.zip_assign(z, |d, x| d * act.scalar_derivative(x)),
        }
    }

    /// The registry name of this activation.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReLU => "relu",
            Self::LeakyReLU => "leaky_relu",
            Self::Logistic => "logistic",
            Self::Linear => "linear",
            Self::Softmax => "softmax",
        }
    }

    /// Whether He initialization suits this activation.
    #[must_use]
    pub const fn is_rectifier(self) -> bool {
        matches!(self, Self::ReLU | Self::LeakyReLU)
    }
}

#[inline]
fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Self::ReLU),
            "leaky_relu" | "leakyrelu" => Ok(Self::LeakyReLU),
            "logistic" | "sigmoid" => Ok(Self::Logistic),
            "linear" | "identity" => Ok(Self::Linear),
            "softmax" => Ok(Self::Softmax),
            _ => Err(Error::UnknownActivation(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::approx_eq;

    #[test]
    fn softmax_is_a_distribution_and_shift_invariant() {
        let z = Tensor::from([1.0, 2.0, 3.0]);
        let s = Activation::Softmax.compute(&z);
        assert!((s.sum() - 1.0).abs() < 1e-6);
        let shifted = Activation::Softmax.compute(&z.map(|x| x + 1000.0));
        assert!(approx_eq(&s, &shifted));
    }

    #[test]
    fn elementwise_derivatives() {
        let z = Tensor::from([-2.0, 0.0, 3.0]);
        assert_eq!(
            Activation::ReLU.derivative(&z),
            Tensor::from([0.0, 0.0, 1.0])
        );
        assert_eq!(
            Activation::LeakyReLU.derivative(&z),
            Tensor::from([0.01, 0.01, 1.0])
        );
        let d = Activation::Logistic.derivative(&Tensor::from([0.0]));
        assert_eq!(d, Tensor::from([0.25]));
    }

    #[test]
    fn backprop_assign_matches_hadamard_with_derivative() {
        let z = Tensor::from([[-1.0, 0.5], [2.0, -0.25]]);
        let delta = Tensor::from([[1.0, 2.0], [3.0, 4.0]]);
        for act in Activation::ALL {
            let mut d = delta.clone();
            act.backprop_assign(&z, &mut d).unwrap();
            assert_eq!(d, delta.hadamard(&act.derivative(&z)).unwrap(), "{act}");
        }
    }

    #[test]
    fn registry_round_trip() {
        for act in Activation::ALL {
            assert_eq!(act.to_string().parse::<Activation>().unwrap(), act);
        }
        assert!(matches!(
            "swish".parse::<Activation>(),
            Err(Error::UnknownActivation(_))
        ));
    }
}
