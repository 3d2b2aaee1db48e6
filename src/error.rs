//! Error taxonomy shared by every layer of the engine.
//!
//! Every fallible operation returns [`Result`]. None of these conditions are
//! retried internally: the current sample or batch is abandoned and the error
//! bubbles up to the training loop, which decides whether to skip the batch or
//! stop the run.
//!
//! Non-finite gradients are deliberately absent from this list. They are
//! sanitized to zero after the parallel merge (see
//! [`crate::grad::GradientComputer`]) and never surface as an error.

use crate::nn::ParamId;
use crate::tensors::Shape;

/// All errors that can occur while building, evaluating or training a model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two operands (tensors, layers or samples) have incompatible dimensions.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// The shape required by the operation.
        expected: Shape,
        /// The shape that was supplied.
        got: Shape,
    },

    /// An operation requires a tensor of a particular rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch {
        /// Required rank.
        expected: usize,
        /// Supplied rank.
        got: usize,
    },

    /// A reduction was requested over a tensor with no elements.
    #[error("cannot reduce an empty tensor")]
    EmptyTensor,

    /// A rank-erased tensor could not be viewed as the requested concrete rank.
    #[error("incompatible generic tensor: cannot view {got} as {expected}")]
    IncompatibleGenericTensor {
        /// Description of the requested view (rank name or shape).
        expected: String,
        /// Actual shape of the tensor.
        got: Shape,
    },

    /// A gradient was deposited against a parameter the receiver does not track.
    #[error("parameter {0} is not registered with this gradient receiver")]
    UnregisteredParameter(ParamId),

    /// Convolution geometry (kernel, padding, stride) does not fit the input.
    #[error("invalid convolution geometry: {0}")]
    InvalidGeometry(String),

    /// A layer, model or optimizer was configured with unusable values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecognized activation function tag.
    #[error("unknown activation function `{0}`")]
    UnknownActivation(String),

    /// Unrecognized cost function tag.
    #[error("unknown cost function `{0}`")]
    UnknownCost(String),

    /// Unrecognized padding scheme tag.
    #[error("unknown padding scheme `{0}`")]
    UnknownPadding(String),

    /// Unrecognized layer variant tag.
    #[error("unknown layer kind `{0}`")]
    UnknownLayer(String),

    /// A model descriptor failed validation at the serialization boundary.
    #[error("invalid model descriptor: {0}")]
    InvalidDescriptor(String),

    /// The worker pool for gradient computation could not be created.
    #[error("failed to build gradient worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Builds a [`Error::ShapeMismatch`] from anything convertible into shapes.
    pub fn shape_mismatch(expected: impl Into<Shape>, got: impl Into<Shape>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Convenience result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
