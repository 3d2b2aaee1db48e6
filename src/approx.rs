//! Approximate equality of floating point values and tensors.
//!
//! Two flavors are provided:
//!
//! - graded absolute closeness through [`RelativeEq`], which rates a pair as
//!   [`ApproxEquality::Precise`] down to [`ApproxEquality::Scarce`];
//! - relative closeness through [`rel_close`], for values whose magnitude
//!   varies too much for a single absolute epsilon (numerical gradients).
//!
//! Containers rate as their worst element. Tensors of different shapes are
//! always [`ApproxEquality::Scarce`].

use crate::tensors::{Tensor, TensorOps};

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// Grades how close `self` is to a right-hand side.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Rates the distance between `self` and `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

/// How close two values are, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon.
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

impl RelativeEq<Self> for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();
        if dif < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();
        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

fn worst<'a, T, U>(pairs: impl Iterator<Item = (&'a T, &'a U)>) -> ApproxEquality
where
    T: RelativeEq<U> + 'a,
    U: 'a,
{
    let mut eq = ApproxEquality::Precise;
    for (t, u) in pairs {
        eq = eq.max(t.approx_eq(u));
        if eq == ApproxEquality::Scarce {
            break;
        }
    }
    eq
}

impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        worst(self.iter().zip(rhs))
    }
}

impl<const N: usize, T: RelativeEq<U>, U> RelativeEq<[U; N]> for [T; N] {
    fn approx_eq(&self, rhs: &[U; N]) -> ApproxEquality {
        worst(self.iter().zip(rhs))
    }
}

impl RelativeEq<Self> for Tensor {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.shape() != rhs.shape() {
            return ApproxEquality::Scarce;
        }
        self.flatten().data().approx_eq(rhs.flatten().data())
    }
}

/// Whether `a` and `b` rate [`ApproxEquality::Precise`].
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// Whether `a` and `b` are at least [`ApproxEquality::Relative`].
pub fn roughly_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) <= ApproxEquality::Relative
}

/// Whether `|a - b| <= rel · max(|a|, |b|)`, with exact equality always close.
#[must_use]
pub fn rel_close(a: f64, b: f64, rel: f64) -> bool {
    a == b || (a - b).abs() <= rel * a.abs().max(b.abs())
}

/// Relative closeness of two tensors, element by element.
#[must_use]
pub fn tensors_rel_close(a: &Tensor, b: &Tensor, rel: f32) -> bool {
    if a.shape() != b.shape() {
        return false;
    }
    let (a, b) = (a.flatten(), b.flatten());
    a.iter()
        .zip(b.iter())
        .all(|(&x, &y)| rel_close(f64::from(x), f64::from(y), f64::from(rel)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_by_distance() {
        assert_eq!(1.0f32.approx_eq(&1.0f32), ApproxEquality::Precise);
        assert_eq!(1.0f32.approx_eq(&1.000_5f32), ApproxEquality::Relative);
        assert_eq!(1.0f64.approx_eq(&1.1f64), ApproxEquality::Scarce);
        assert_eq!([1.0f32, 2.0].approx_eq(&[1.0f32, 2.000_002]), ApproxEquality::Partial);
    }

    #[test]
    fn tensors_compare_shapes_first() {
        let a = Tensor::from([1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::from([[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(a.approx_eq(&b), ApproxEquality::Scarce);
        assert!(approx_eq(&b, &b.map(|x| x + 1e-7)));
        assert!(!tensors_rel_close(&a, &b, 0.1));
    }

    #[test]
    fn relative_closeness_scales() {
        assert!(rel_close(1000.0, 1001.0, 1e-2));
        assert!(!rel_close(1e-3, 2e-3, 1e-2));
        assert!(rel_close(0.0, 0.0, 0.0));
    }
}
