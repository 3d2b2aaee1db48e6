//! Core tensor data structures and operations.
//!
//! # Core Tensor Utilities
//!
//! Three concrete containers hold 32-bit floats:
//!
//! - [`Vector`]: rank 1, flat buffer
//! - [`Matrix`]: rank 2, flat row-major buffer
//! - [`NTensor`]: rank N ≥ 3, a composite of rank-(N-1) slices
//!
//! [`Tensor`] erases the rank so layers and models can pass tensors around
//! without generic parameters. A tensor can be viewed as a concrete rank again
//! through [`Tensor::view`], which checks both rank and shape and fails with
//! [`Error::IncompatibleGenericTensor`] otherwise.
//!
//! ## Element order
//!
//! Every elementwise traversal (`for_each_element`, `flatten`, `zip`) is
//! row-major, recursing from the highest rank to the lowest. Convolution and the
//! flatten layer rely on this order.
//!
//! ## Shape checks
//!
//! Binary operations compare shapes before touching any element and fail with
//! [`Error::ShapeMismatch`]. Nothing is broadcast or truncated.
//!
//! ## Example
//!
//! ```rust
//! use briny_train::tensor;
//! use briny_train::tensors::{Matrix, Shape, TensorOps, Vector};
//!
//! let w = Matrix::from([[1.0, 2.0], [3.0, 4.0]]);
//! let x = Vector::from([1.0, 1.0]);
//! let y = w.times_vector(&x).unwrap();
//! assert_eq!(y.data(), &[3.0, 7.0]);
//! assert_eq!(y.sum(), 10.0);
//!
//! let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! assert_eq!(t.shape(), Shape::from([2, 2]));
//! ```

mod matrix;
mod ntensor;
mod shape;
mod vector;

pub use matrix::Matrix;
pub use ntensor::NTensor;
pub use shape::Shape;
pub use vector::Vector;

use crate::error::{Error, Result};

/// Shared elementwise algebra over every tensor rank.
///
/// Implementors provide traversal primitives; everything else is derived. The
/// primitives take `dyn` closures so the recursive [`NTensor`] traversal does
/// not instantiate a new closure type per nesting level.
pub trait TensorOps: Clone {
    /// The dimensions of this tensor.
    fn shape(&self) -> Shape;

    /// Number of elements.
    fn len(&self) -> usize;

    /// Whether the tensor has no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every element in row-major order.
    fn for_each_element(&self, f: &mut dyn FnMut(f32));

    /// Visits every element mutably in row-major order.
    fn for_each_element_mut(&mut self, f: &mut dyn FnMut(&mut f32));

    /// Pairs elements of `self` and `other` in row-major order.
    ///
    /// Callers must have checked the shapes already; implementations still
    /// report a mismatch instead of indexing out of bounds.
    fn zip_elements(&self, other: &Self, f: &mut dyn FnMut(f32, f32)) -> Result<()>;

    /// Mutable form of [`TensorOps::zip_elements`].
    fn zip_elements_mut(&mut self, other: &Self, f: &mut dyn FnMut(&mut f32, f32)) -> Result<()>;

    /// Fails with [`Error::ShapeMismatch`] unless both shapes are identical.
    fn ensure_same_shape(&self, other: &Self) -> Result<()> {
        let expected = self.shape();
        let got = other.shape();
        if expected == got {
            Ok(())
        } else {
            Err(Error::ShapeMismatch { expected, got })
        }
    }

    /// Combines `other` into `self` elementwise with `f(self, other)`.
    fn zip_assign<F: FnMut(f32, f32) -> f32>(&mut self, other: &Self, mut f: F) -> Result<()> {
        self.ensure_same_shape(other)?;
        self.zip_elements_mut(other, &mut |a, b| *a = f(*a, b))
    }

    /// Allocating form of [`TensorOps::zip_assign`].
    fn zip<F: FnMut(f32, f32) -> f32>(&self, other: &Self, f: F) -> Result<Self> {
        let mut out = self.clone();
        out.zip_assign(other, f)?;
        Ok(out)
    }

    /// `self + other`.
    fn plus(&self, other: &Self) -> Result<Self> {
        self.zip(other, |a, b| a + b)
    }

    /// `self += other`.
    fn plus_assign(&mut self, other: &Self) -> Result<()> {
        self.zip_assign(other, |a, b| a + b)
    }

    /// `self - other`.
    fn minus(&self, other: &Self) -> Result<Self> {
        self.zip(other, |a, b| a - b)
    }

    /// `self -= other`.
    fn minus_assign(&mut self, other: &Self) -> Result<()> {
        self.zip_assign(other, |a, b| a - b)
    }

    /// Elementwise product.
    fn hadamard(&self, other: &Self) -> Result<Self> {
        self.zip(other, |a, b| a * b)
    }

    /// In-place elementwise product.
    fn hadamard_assign(&mut self, other: &Self) -> Result<()> {
        self.zip_assign(other, |a, b| a * b)
    }

    /// Applies `f` to every element in place.
    fn map_assign<F: FnMut(f32) -> f32>(&mut self, mut f: F) {
        self.for_each_element_mut(&mut |x| *x = f(*x));
    }

    /// Applies `f` to every element, returning a new tensor.
    #[must_use]
    fn map<F: FnMut(f32) -> f32>(&self, f: F) -> Self {
        let mut out = self.clone();
        out.map_assign(f);
        out
    }

    /// Multiplies every element by `scalar`.
    #[must_use]
    fn times(&self, scalar: f32) -> Self {
        self.map(|x| x * scalar)
    }

    /// In-place [`TensorOps::times`].
    fn times_assign(&mut self, scalar: f32) {
        self.map_assign(|x| x * scalar);
    }

    /// Divides every element by `scalar`.
    #[must_use]
    fn div(&self, scalar: f32) -> Self {
        self.map(|x| x / scalar)
    }

    /// In-place [`TensorOps::div`].
    fn div_assign(&mut self, scalar: f32) {
        self.map_assign(|x| x / scalar);
    }

    /// Folds all elements with `f`, seeded with the first element.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyTensor`] when there is nothing to fold.
    fn reduce<F: FnMut(f32, f32) -> f32>(&self, mut f: F) -> Result<f32> {
        let mut acc: Option<f32> = None;
        self.for_each_element(&mut |x| {
            acc = Some(match acc {
                Some(a) => f(a, x),
                None => x,
            });
        });
        acc.ok_or(Error::EmptyTensor)
    }

    /// Sum of all elements (zero for an empty tensor).
    fn sum(&self) -> f32 {
        let mut total = 0.0;
        self.for_each_element(&mut |x| total += x);
        total
    }

    /// Smallest element.
    fn min(&self) -> Result<f32> {
        self.reduce(f32::min)
    }

    /// Largest element.
    fn max(&self) -> Result<f32> {
        self.reduce(f32::max)
    }

    /// Inner product of two equally shaped tensors.
    fn dot(&self, other: &Self) -> Result<f32> {
        self.ensure_same_shape(other)?;
        let mut acc = 0.0;
        self.zip_elements(other, &mut |a, b| acc += a * b)?;
        Ok(acc)
    }

    /// Row-major linearization.
    #[must_use]
    fn flatten(&self) -> Vector {
        let mut data = Vec::with_capacity(self.len());
        self.for_each_element(&mut |x| data.push(x));
        Vector::new(data)
    }

    /// An independent copy.
    #[must_use]
    fn copy(&self) -> Self {
        self.clone()
    }

    /// A zeroed tensor of the same shape.
    #[must_use]
    fn copy_zero(&self) -> Self {
        self.map(|_| 0.0)
    }

    /// Sets every element to `value`.
    fn fill(&mut self, value: f32) {
        self.map_assign(|_| value);
    }

    /// Replaces NaN and infinite elements with zero, returning how many were replaced.
    fn sanitize(&mut self) -> usize {
        let mut replaced = 0;
        self.for_each_element_mut(&mut |x| {
            if !x.is_finite() {
                *x = 0.0;
                replaced += 1;
            }
        });
        replaced
    }
}

/// A rank-erased tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// Rank 1.
    Vector(Vector),
    /// Rank 2.
    Matrix(Matrix),
    /// Rank 3 and above.
    NTensor(NTensor),
}

impl Tensor {
    /// A zero-filled tensor of the given shape.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] for a rank-0 shape.
    pub fn zeros(shape: &Shape) -> Result<Self> {
        Self::from_flat(shape, vec![0.0; shape.size()])
    }

    /// Builds a tensor of `shape` from row-major `data`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] when `data` has the wrong length, or
    /// [`Error::RankMismatch`] for a rank-0 shape.
    pub fn from_flat(shape: &Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.size() {
            return Err(Error::shape_mismatch(shape, [data.len()]));
        }
        match shape.rank() {
            0 => Err(Error::RankMismatch {
                expected: 1,
                got: 0,
            }),
            1 => Ok(Self::Vector(Vector::new(data))),
            2 => Ok(Self::Matrix(Matrix::new(shape.dims()[0], shape.dims()[1], data)?)),
            _ => Ok(Self::NTensor(NTensor::from_flat(shape, data)?)),
        }
    }

    /// Reinterprets the row-major elements under a new shape.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] when the element counts differ.
    pub fn reshape(&self, shape: &Shape) -> Result<Self> {
        if shape.size() != self.len() {
            return Err(Error::shape_mismatch(shape, self.shape()));
        }
        Self::from_flat(shape, self.flatten().into_inner())
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Vector(_) => 1,
            Self::Matrix(_) => 2,
            Self::NTensor(t) => t.shape().rank(),
        }
    }

    /// Downcasts to a concrete rank without checking dimensions.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleGenericTensor`] when the rank differs.
    pub fn downcast<T: Downcast>(&self) -> Result<&T> {
        T::downcast_ref(self).ok_or_else(|| Error::IncompatibleGenericTensor {
            expected: T::RANK_NAME.to_owned(),
            got: self.shape(),
        })
    }

    /// Mutable form of [`Tensor::downcast`].
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleGenericTensor`] when the rank differs.
    pub fn downcast_mut<T: Downcast>(&mut self) -> Result<&mut T> {
        let got = self.shape();
        T::downcast_mut(self).ok_or_else(|| Error::IncompatibleGenericTensor {
            expected: T::RANK_NAME.to_owned(),
            got,
        })
    }

    /// Views this tensor as a concrete rank with exactly the shape `expected`.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleGenericTensor`] when either rank or shape differ.
    pub fn view<T: Downcast>(&self, expected: &Shape) -> Result<&T> {
        let got = self.shape();
        match T::downcast_ref(self) {
            Some(t) if got == *expected => Ok(t),
            _ => Err(Error::IncompatibleGenericTensor {
                expected: format!("{} {expected}", T::RANK_NAME),
                got,
            }),
        }
    }

    /// Mutable form of [`Tensor::view`].
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleGenericTensor`] when either rank or shape differ.
    pub fn view_mut<T: Downcast>(&mut self, expected: &Shape) -> Result<&mut T> {
        let got = self.shape();
        if got != *expected {
            return Err(Error::IncompatibleGenericTensor {
                expected: format!("{} {expected}", T::RANK_NAME),
                got,
            });
        }
        T::downcast_mut(self).ok_or_else(|| Error::IncompatibleGenericTensor {
            expected: format!("{} {expected}", T::RANK_NAME),
            got,
        })
    }

    /// Fails with [`Error::ShapeMismatch`] unless this tensor has shape `expected`.
    pub fn expect_shape(&self, expected: &Shape) -> Result<()> {
        let got = self.shape();
        if got == *expected {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                expected: expected.clone(),
                got,
            })
        }
    }
}

impl TensorOps for Tensor {
    fn shape(&self) -> Shape {
        match self {
            Self::Vector(v) => v.shape(),
            Self::Matrix(m) => m.shape(),
            Self::NTensor(t) => t.shape(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Vector(v) => v.len(),
            Self::Matrix(m) => m.len(),
            Self::NTensor(t) => t.len(),
        }
    }

    fn for_each_element(&self, f: &mut dyn FnMut(f32)) {
        match self {
            Self::Vector(v) => v.for_each_element(f),
            Self::Matrix(m) => m.for_each_element(f),
            Self::NTensor(t) => t.for_each_element(f),
        }
    }

    fn for_each_element_mut(&mut self, f: &mut dyn FnMut(&mut f32)) {
        match self {
            Self::Vector(v) => v.for_each_element_mut(f),
            Self::Matrix(m) => m.for_each_element_mut(f),
            Self::NTensor(t) => t.for_each_element_mut(f),
        }
    }

    fn zip_elements(&self, other: &Self, f: &mut dyn FnMut(f32, f32)) -> Result<()> {
        match (self, other) {
            (Self::Vector(a), Self::Vector(b)) => a.zip_elements(b, f),
            (Self::Matrix(a), Self::Matrix(b)) => a.zip_elements(b, f),
            (Self::NTensor(a), Self::NTensor(b)) => a.zip_elements(b, f),
            (a, b) => Err(Error::ShapeMismatch {
                expected: a.shape(),
                got: b.shape(),
            }),
        }
    }

    fn zip_elements_mut(&mut self, other: &Self, f: &mut dyn FnMut(&mut f32, f32)) -> Result<()> {
        match (self, other) {
            (Self::Vector(a), Self::Vector(b)) => a.zip_elements_mut(b, f),
            (Self::Matrix(a), Self::Matrix(b)) => a.zip_elements_mut(b, f),
            (Self::NTensor(a), Self::NTensor(b)) => a.zip_elements_mut(b, f),
            (a, b) => Err(Error::ShapeMismatch {
                expected: a.shape(),
                got: b.shape(),
            }),
        }
    }
}

/// Concrete tensor ranks reachable from a [`Tensor`].
pub trait Downcast: TensorOps + Sized {
    /// Human readable rank name used in error messages.
    const RANK_NAME: &'static str;

    /// Borrows the concrete tensor if the variant matches.
    fn downcast_ref(tensor: &Tensor) -> Option<&Self>;

    /// Mutably borrows the concrete tensor if the variant matches.
    fn downcast_mut(tensor: &mut Tensor) -> Option<&mut Self>;
}

impl Downcast for Vector {
    const RANK_NAME: &'static str = "Vector";

    fn downcast_ref(tensor: &Tensor) -> Option<&Self> {
        match tensor {
            Tensor::Vector(v) => Some(v),
            _ => None,
        }
    }

    fn downcast_mut(tensor: &mut Tensor) -> Option<&mut Self> {
        match tensor {
            Tensor::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl Downcast for Matrix {
    const RANK_NAME: &'static str = "Matrix";

    fn downcast_ref(tensor: &Tensor) -> Option<&Self> {
        match tensor {
            Tensor::Matrix(m) => Some(m),
            _ => None,
        }
    }

    fn downcast_mut(tensor: &mut Tensor) -> Option<&mut Self> {
        match tensor {
            Tensor::Matrix(m) => Some(m),
            _ => None,
        }
    }
}

impl Downcast for NTensor {
    const RANK_NAME: &'static str = "NTensor";

    fn downcast_ref(tensor: &Tensor) -> Option<&Self> {
        match tensor {
            Tensor::NTensor(t) => Some(t),
            _ => None,
        }
    }

    fn downcast_mut(tensor: &mut Tensor) -> Option<&mut Self> {
        match tensor {
            Tensor::NTensor(t) => Some(t),
            _ => None,
        }
    }
}

/// Builds a rank-1 or rank-2 [`Tensor`] from a bracketed literal.
///
/// ```rust
/// use briny_train::tensor;
///
/// let v = tensor!([1.0, 2.0, 3.0]);
/// let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!((v.rank(), m.rank()), (1, 2));
/// ```
///
/// # Panics
///
/// Panics when the rows of a rank-2 literal have different lengths.
#[macro_export]
macro_rules! tensor {
    ([ $( [ $( $x:expr ),* $(,)? ] ),+ $(,)? ]) => {
        $crate::tensors::Tensor::from(
            $crate::tensors::Matrix::from_rows(vec![ $( vec![ $( $x ),* ] ),+ ])
                .unwrap_or_else(|e| panic!("ragged tensor literal: {e}")),
        )
    };
    ([ $( $x:expr ),* $(,)? ]) => {
        $crate::tensors::Tensor::from($crate::tensors::Vector::new(vec![ $( $x ),* ]))
    };
}

impl From<Vector> for Tensor {
    fn from(v: Vector) -> Self {
        Self::Vector(v)
    }
}

impl From<Matrix> for Tensor {
    fn from(m: Matrix) -> Self {
        Self::Matrix(m)
    }
}

impl From<NTensor> for Tensor {
    fn from(t: NTensor) -> Self {
        Self::NTensor(t)
    }
}

impl<const N: usize> From<[f32; N]> for Tensor {
    fn from(data: [f32; N]) -> Self {
        Self::Vector(Vector::from(data))
    }
}

impl<const R: usize, const C: usize> From<[[f32; C]; R]> for Tensor {
    fn from(rows: [[f32; C]; R]) -> Self {
        Self::Matrix(Matrix::from(rows))
    }
}

impl<const D: usize, const R: usize, const C: usize> From<[[[f32; C]; R]; D]> for Tensor {
    fn from(slices: [[[f32; C]; R]; D]) -> Self {
        Self::NTensor(NTensor::from(slices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_checks_rank_and_shape() {
        let t = Tensor::from([[1.0, 2.0], [3.0, 4.0]]);
        assert!(t.view::<Matrix>(&Shape::from([2, 2])).is_ok());
        assert!(matches!(
            t.view::<Matrix>(&Shape::from([1, 4])),
            Err(Error::IncompatibleGenericTensor { .. })
        ));
        assert!(matches!(
            t.downcast::<Vector>(),
            Err(Error::IncompatibleGenericTensor { .. })
        ));
    }

    #[test]
    fn reshape_keeps_row_major_order() {
        let t = Tensor::from([[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]);
        let flat = t.reshape(&Shape::from([8])).unwrap();
        assert_eq!(
            flat.downcast::<Vector>().unwrap().data(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
        let back = flat.reshape(&t.shape()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn mixed_ranks_never_zip() {
        let mut a = Tensor::from([1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::from([[1.0, 2.0], [3.0, 4.0]]);
        assert!(matches!(a.plus_assign(&b), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn reductions() {
        let t = Tensor::from([3.0, -1.0, 2.0]);
        assert_eq!(t.sum(), 4.0);
        assert_eq!(t.min().unwrap(), -1.0);
        assert_eq!(t.max().unwrap(), 3.0);
        let empty = Tensor::Vector(Vector::new(Vec::new()));
        assert!(matches!(empty.reduce(f32::max), Err(Error::EmptyTensor)));
        assert_eq!(empty.sum(), 0.0);
    }
}
