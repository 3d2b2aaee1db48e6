//! The parameter arena.
//!
//! Layers never own their weights directly. Each learnable tensor lives in a
//! [`Parameters`] arena owned by the model, and layers keep the [`ParamId`]
//! handed out at registration. Gradients are keyed by the same id, which lets
//! the optimizer walk parameters and gradients side by side without knowing
//! anything about layers.

use core::fmt;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::tensors::{Tensor, TensorOps};

/// Identity of a learnable parameter: its index in the [`Parameters`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamId(usize);

impl ParamId {
    /// Index into the arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of every learnable tensor of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    tensors: Vec<Tensor>,
}

impl Parameters {
    /// An empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `tensor` into the arena and returns its id.
    pub fn register(&mut self, tensor: impl Into<Tensor>) -> ParamId {
        self.tensors.push(tensor.into());
        ParamId(self.tensors.len() - 1)
    }

    /// The tensor behind `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] if `id` was not issued by this arena.
    pub fn get(&self, id: ParamId) -> Result<&Tensor> {
        self.tensors
            .get(id.0)
            .ok_or(Error::UnregisteredParameter(id))
    }

    /// Mutable access to the tensor behind `id`.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] if `id` was not issued by this arena.
    pub fn get_mut(&mut self, id: ParamId) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(id.0)
            .ok_or(Error::UnregisteredParameter(id))
    }

    /// Number of registered tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether no tensors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalars across all tensors.
    #[must_use]
    pub fn scalar_count(&self) -> usize {
        self.tensors.iter().map(TensorOps::len).sum()
    }

    /// Every issued id, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ParamId> + '_ {
        (0..self.tensors.len()).map(ParamId)
    }

    /// `(id, tensor)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Tensor)> + '_ {
        self.tensors.iter().enumerate().map(|(i, t)| (ParamId(i), t))
    }

    /// Runs `f` on every parameter in parallel, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns.
    pub fn par_update<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(ParamId, &mut Tensor) -> Result<()> + Sync + Send,
    {
        self.tensors
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(i, t)| f(ParamId(i), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_arena_indices() {
        let mut params = Parameters::new();
        let a = params.register([1.0, 2.0]);
        let b = params.register([[1.0], [2.0]]);
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(params.scalar_count(), 4);
        assert_eq!(b.to_string(), "#1");

        let mut other = Parameters::new();
        other.register([0.0]);
        let stray = other.register([0.0]);
        let _ = params.register([0.0]);
        assert!(params.get(stray).is_ok());
        assert!(matches!(
            Parameters::new().get(stray),
            Err(Error::UnregisteredParameter(id)) if id == stray
        ));
    }

    #[test]
    fn parallel_update_touches_everything() {
        let mut params = Parameters::new();
        params.register([1.0, 2.0]);
        params.register([[3.0, 4.0]]);
        params
            .par_update(|_, t| {
                t.times_assign(2.0);
                Ok(())
            })
            .unwrap();
        let total: f32 = params.iter().map(|(_, t)| t.sum()).sum();
        assert_eq!(total, 20.0);
    }
}
