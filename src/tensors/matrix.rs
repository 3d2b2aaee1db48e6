use core::ops::{Index, IndexMut};

use super::{Shape, TensorOps, Vector};
use crate::error::{Error, Result};

/// A rank-2 tensor stored as a flat row-major buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Creates a `rows × cols` matrix from row-major `data`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::shape_mismatch([rows, cols], [data.len()]));
        }
        Ok(Self { rows, cols, data })
    }

    /// A zero matrix.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix by evaluating `f(row, col)` for every cell.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// Builds a matrix from equally long rows.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] when the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for row in rows {
            if row.len() != cols {
                return Err(Error::shape_mismatch([cols], [row.len()]));
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    /// The outer product `a · bᵀ`.
    #[must_use]
    pub fn outer(a: &Vector, b: &Vector) -> Self {
        Self::from_fn(a.len(), b.len(), |i, j| a[i] * b[j])
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Row-major elements.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Row-major elements, mutably.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the matrix, returning its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Row `i` as a slice.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// The transpose.
    #[must_use]
    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |i, j| self[(j, i)])
    }

    /// `self · x`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] unless `x.len() == self.cols()`.
    pub fn times_vector(&self, x: &Vector) -> Result<Vector> {
        if x.len() != self.cols {
            return Err(Error::shape_mismatch([self.cols], x.shape()));
        }
        Ok(Vector::new(
            (0..self.rows)
                .map(|i| self.row(i).iter().zip(x).map(|(w, v)| w * v).sum::<f32>())
                .collect(),
        ))
    }

    /// `selfᵀ · d`, without materializing the transpose.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] unless `d.len() == self.rows()`.
    pub fn transpose_times_vector(&self, d: &Vector) -> Result<Vector> {
        if d.len() != self.rows {
            return Err(Error::shape_mismatch([self.rows], d.shape()));
        }
        let mut out = vec![0.0; self.cols];
        for (i, &di) in d.iter().enumerate() {
            for (o, &w) in out.iter_mut().zip(self.row(i)) {
                *o += w * di;
            }
        }
        Ok(Vector::new(out))
    }

    /// Accumulates the outer product `a · bᵀ` into `self`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] unless `self` is `a.len() × b.len()`.
    pub fn add_outer(&mut self, a: &Vector, b: &Vector) -> Result<()> {
        if self.rows != a.len() || self.cols != b.len() {
            return Err(Error::shape_mismatch(self.shape(), [a.len(), b.len()]));
        }
        for (i, &ai) in a.iter().enumerate() {
            let row = &mut self.data[i * self.cols..(i + 1) * self.cols];
            for (cell, &bj) in row.iter_mut().zip(b) {
                *cell += ai * bj;
            }
        }
        Ok(())
    }
}

impl TensorOps for Matrix {
    fn shape(&self) -> Shape {
        Shape::new([self.rows, self.cols])
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
        self.ensure_same_shape(other)?;
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            f(a, b);
        }
        Ok(())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f32;

    fn index(&self, (i, j): (usize, usize)) -> &f32 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f32 {
        &mut self.data[i * self.cols + j]
    }
}

impl<const R: usize, const C: usize> From<[[f32; C]; R]> for Matrix {
    fn from(rows: [[f32; C]; R]) -> Self {
        Self {
            rows: R,
            cols: C,
            data: rows.iter().flatten().copied().collect(),
        }
    }
}
