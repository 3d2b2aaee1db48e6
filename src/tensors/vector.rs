use core::ops::{Index, IndexMut};

use super::{Shape, TensorOps};
use crate::error::{Error, Result};

/// A rank-1 tensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Wraps `data` as a vector.
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// A zero vector of length `len`.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    /// The elements.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The elements, mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the vector, returning its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> core::slice::Iter<'_, f32> {
        self.data.iter()
    }

    /// Index of the largest element, `None` when empty.
    #[must_use]
    pub fn argmax(&self) -> Option<usize> {
        self.data
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &x)| match best {
                Some((_, b)) if b >= x => best,
                _ => Some((i, x)),
            })
            .map(|(i, _)| i)
    }
}

impl TensorOps for Vector {
    fn shape(&self) -> Shape {
        Shape::new([self.data.len()])
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn for_each_element(&self, f: &mut dyn FnMut(f32)) {
        for &x in &self.data {
            f(x);
        }
    }

    fn for_each_element_mut(&mut self, f: &mut dyn FnMut(&mut f32)) {
        for x in &mut self.data {
            f(x);
        }
    }

    fn zip_elements(&self, other: &Self, f: &mut dyn FnMut(f32, f32)) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (&a, &b) in self.data.iter().zip(&other.data) {
            f(a, b);
        }
        Ok(())
    }

    fn zip_elements_mut(&mut self, other: &Self, f: &mut dyn FnMut(&mut f32, f32)) -> Result<()> {
        if self.data.len() != other.data.len() {
            return Err(Error::shape_mismatch(self.shape(), other.shape()));
        }
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            f(a, b);
        }
        Ok(())
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, i: usize) -> &mut f32 {
        &mut self.data[i]
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self { data }
    }
}

impl<const N: usize> From<[f32; N]> for Vector {
    fn from(data: [f32; N]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl<'a> IntoIterator for &'a Vector {
    type Item = &'a f32;
    type IntoIter = core::slice::Iter<'a, f32>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}
