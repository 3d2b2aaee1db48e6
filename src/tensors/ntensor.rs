use super::{Matrix, Shape, Tensor, TensorOps};
use crate::error::{Error, Result};

/// A rank-N tensor (N ≥ 3) made of rank-(N-1) slices.
///
/// Every slice has the shape [`Shape::lower`] of the composite. A rank-3
/// tensor is a list of matrices, a rank-4 tensor a list of rank-3 tensors,
/// and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct NTensor {
    shape: Shape,
    slices: Vec<Tensor>,
}

impl NTensor {
    /// Stacks equally shaped slices.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyTensor`] without slices (the slice shape is unknown)
    /// - [`Error::RankMismatch`] if the slices are vectors
    /// - [`Error::ShapeMismatch`] if the slices differ in shape
    pub fn from_slices(slices: Vec<Tensor>) -> Result<Self> {
        let lower = slices.first().ok_or(Error::EmptyTensor)?.shape();
        if lower.rank() < 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: lower.rank(),
            });
        }
        for s in &slices {
            s.expect_shape(&lower)?;
        }
        Ok(Self {
            shape: lower.raise(slices.len()),
            slices,
        })
    }

    /// A zero tensor of `shape`.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] for shapes below rank 3.
    pub fn zeros(shape: &Shape) -> Result<Self> {
        Self::from_flat(shape, vec![0.0; shape.size()])
    }

    /// Builds a tensor from row-major `data`.
    ///
    /// # Errors
    ///
    /// [`Error::RankMismatch`] below rank 3, [`Error::ShapeMismatch`] when
    /// the element count is wrong.
    pub fn from_flat(shape: &Shape, data: Vec<f32>) -> Result<Self> {
        if shape.rank() < 3 {
            return Err(Error::RankMismatch {
                expected: 3,
                got: shape.rank(),
            });
        }
        if data.len() != shape.size() {
            return Err(Error::shape_mismatch(shape, [data.len()]));
        }
        let lower = shape.lower();
        let stride = lower.size();
        let mut slices = Vec::with_capacity(shape.dims()[0]);
        for i in 0..shape.dims()[0] {
            let chunk = data[i * stride..(i + 1) * stride].to_vec();
            slices.push(Tensor::from_flat(&lower, chunk)?);
        }
        Ok(Self {
            shape: shape.clone(),
            slices,
        })
    }

    /// The slices, highest dimension first.
    #[must_use]
    pub fn slices(&self) -> &[Tensor] {
        &self.slices
    }

    /// Slice `i`.
    #[must_use]
    pub fn slice(&self, i: usize) -> Option<&Tensor> {
        self.slices.get(i)
    }

    /// The slices, mutably. Callers must keep every slice's shape.
    pub(crate) fn slices_mut(&mut self) -> &mut [Tensor] {
        &mut self.slices
    }

    /// Descends through `index` (one entry per dimension above the last two)
    /// to the matrix it addresses.
    ///
    /// For a `[C, H, W]` tensor `matrix_at(&[c])` is channel `c`; for a
    /// `[O, C, kH, kW]` kernel bank `matrix_at(&[o, c])` is one kernel.
    ///
    /// # Errors
    ///
    /// [`Error::IncompatibleGenericTensor`] when the index is out of range or
    /// does not land on a matrix.
    pub fn matrix_at(&self, index: &[usize]) -> Result<&Matrix> {
        let slice = index
            .split_first()
            .and_then(|(&i, _)| self.slices.get(i))
            .ok_or_else(|| self.bad_index(index))?;
        match &index[1..] {
            [] => slice.downcast::<Matrix>(),
            rest => slice.downcast::<NTensor>()?.matrix_at(rest),
        }
    }

    /// Mutable form of [`NTensor::matrix_at`]. Callers must keep the matrix's shape.
    pub(crate) fn matrix_at_mut(&mut self, index: &[usize]) -> Result<&mut Matrix> {
        let err = self.bad_index(index);
        let slice = index
            .split_first()
            .and_then(|(&i, _)| self.slices.get_mut(i))
            .ok_or(err)?;
        match &index[1..] {
            [] => slice.downcast_mut::<Matrix>(),
            rest => slice.downcast_mut::<NTensor>()?.matrix_at_mut(rest),
        }
    }

    fn bad_index(&self, index: &[usize]) -> Error {
        Error::IncompatibleGenericTensor {
            expected: format!("matrix at index {index:?}"),
            got: self.shape.clone(),
        }
    }
}

impl TensorOps for NTensor {
    fn shape(&self) -> Shape {
        self.shape.clone()
    }

    fn len(&self) -> usize {
        self.shape.size()
    }

    fn for_each_element(&self, f: &mut dyn FnMut(f32)) {
        for s in &self.slices {
            s.for_each_element(f);
        }
    }

    fn for_each_element_mut(&mut self, f: &mut dyn FnMut(&mut f32)) {
        for s in &mut self.slices {
            s.for_each_element_mut(f);
        }
    }

    fn zip_elements(&self, other: &Self, f: &mut dyn FnMut(f32, f32)) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (a, b) in self.slices.iter().zip(&other.slices) {
            a.zip_elements(b, f)?;
        }
        Ok(())
    }

    fn zip_elements_mut(&mut self, other: &Self, f: &mut dyn FnMut(&mut f32, f32)) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (a, b) in self.slices.iter_mut().zip(&other.slices) {
            a.zip_elements_mut(b, f)?;
        }
        Ok(())
    }
}

impl<const D: usize, const R: usize, const C: usize> From<[[[f32; C]; R]; D]> for NTensor {
    fn from(slices: [[[f32; C]; R]; D]) -> Self {
        Self {
            shape: Shape::new([D, R, C]),
            slices: slices
                .into_iter()
                .map(|m| Tensor::Matrix(Matrix::from(m)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_order_is_row_major() {
        let t = NTensor::from_flat(&Shape::from([2, 1, 2, 2]), (0..8).map(|x| x as f32).collect())
            .unwrap();
        assert_eq!(t.matrix_at(&[1, 0]).unwrap().data(), &[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(t.flatten().data(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(t.matrix_at(&[2, 0]).is_err());
        assert!(t.matrix_at(&[1]).is_err());
    }

    #[test]
    fn slices_must_agree() {
        let a = Tensor::from([[1.0, 2.0]]);
        let b = Tensor::from([[1.0], [2.0]]);
        assert!(matches!(
            NTensor::from_slices(vec![a.clone(), b]),
            Err(Error::ShapeMismatch { .. })
        ));
        let ok = NTensor::from_slices(vec![a.clone(), a]).unwrap();
        assert_eq!(ok.shape(), Shape::from([2, 1, 2]));
    }
}
