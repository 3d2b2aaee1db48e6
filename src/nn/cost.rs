//! Cost functions measuring a prediction against its target.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::tensors::{Tensor, TensorOps};

/// Lower clamp for probabilities fed to `ln`.
const LN_FLOOR: f32 = 1e-12;

/// Scalar cost of one sample, and its gradient with respect to the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cost {
    /// `Σ (a - t)² / 2`.
    #[default]
    MeanSquaredError,
    /// `-Σ t · ln(a)`, intended for probability outputs.
    CrossEntropy,
}

impl Cost {
    /// Every variant, in registry order.
    pub const ALL: [Self; 2] = [Self::MeanSquaredError, Self::CrossEntropy];

    /// Cost of predicting `actual` when `target` was expected.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn compute(self, target: &Tensor, actual: &Tensor) -> Result<f32> {
        let mut total = 0.0;
        match self {
            Self::MeanSquaredError => actual.zip_elements(target, &mut |a, t| {
                let d = a - t;
                total += d * d;
            })?,
            Self::CrossEntropy => actual.zip_elements(target, &mut |a, t| {
                if t != 0.0 {
                    total -= t * a.max(LN_FLOOR).ln();
                }
            })?,
        }
        Ok(match self {
            Self::MeanSquaredError => total / 2.0,
            Self::CrossEntropy => total,
        })
    }

    /// `∂cost / ∂actual`.
    ///
    /// Both variants give `actual - target`. For cross-entropy this is the
    /// gradient with respect to the *pre-activation* of a Softmax output; the
    /// back propagator relies on that pairing and skips the Softmax
    /// derivative.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn derivative(self, target: &Tensor, actual: &Tensor) -> Result<Tensor> {
        actual.minus(target)
    }

    /// The registry name of this cost.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MeanSquaredError => "mse",
            Self::CrossEntropy => "cross_entropy",
        }
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Cost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mse" | "mean_squared_error" => Ok(Self::MeanSquaredError),
            "cross_entropy" | "crossentropy" => Ok(Self::CrossEntropy),
            _ => Err(Error::UnknownCost(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_squared_error() {
        let t = Tensor::from([1.0, 0.0]);
        let a = Tensor::from([0.0, 2.0]);
        assert_eq!(Cost::MeanSquaredError.compute(&t, &a).unwrap(), 2.5);
        assert_eq!(
            Cost::MeanSquaredError.derivative(&t, &a).unwrap(),
            Tensor::from([-1.0, 2.0])
        );
    }

    #[test]
    fn cross_entropy_is_clamped() {
        let t = Tensor::from([0.0, 1.0]);
        let a = Tensor::from([1.0, 0.0]);
        let c = Cost::CrossEntropy.compute(&t, &a).unwrap();
        assert!(c.is_finite() && c > 20.0);
        let perfect = Cost::CrossEntropy.compute(&t, &t).unwrap();
        assert_eq!(perfect, 0.0);
    }

    #[test]
    fn shapes_are_checked() {
        let t = Tensor::from([1.0, 0.0]);
        let a = Tensor::from([[1.0, 0.0]]);
        assert!(matches!(
            Cost::MeanSquaredError.compute(&t, &a),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!("hinge".parse::<Cost>().is_err());
        for c in Cost::ALL {
            assert_eq!(c.to_string().parse::<Cost>().unwrap(), c);
        }
    }
}
