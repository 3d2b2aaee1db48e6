//! Plain-data model snapshots.
//!
//! # Model Descriptors
//!
//! A [`ModelDescriptor`] is everything needed to rebuild a [`Model`]: its
//! input shape and, per layer, a variant tag, an activation tag, the layer's
//! dimensions and its parameters as flat row-major arrays. Descriptors carry
//! no behavior and no byte format; writing them to a file is left to the
//! caller.
//!
//! ```text
//! kind           dims              weights                bias   padding / stride
//! "dense"        [units]           units × fan_in         units  -
//! "convolution"  [F, kH, kW]       F × C × kH × kW        F      mode, pH, pW / sH, sW
//! "flatten"      []                -                      -      -
//! ```
//!
//! Descriptors coming back in pass through `briny`'s [`TrustedData`] before
//! anything is built: a structurally broken descriptor fails with
//! [`Error::InvalidDescriptor`], an unrecognized tag with the matching
//! `Unknown*` error, and weights that do not fit the rebuilt geometry with
//! [`Error::ShapeMismatch`].
//!
//! # Example
//!
//! ```rust
//! use briny_train::nn::{Activation, Dense, Model};
//! use briny_train::tensors::Tensor;
//!
//! let model = Model::builder([3])
//!     .layer(Dense::new(2, Activation::Logistic))
//!     .seed(5)
//!     .build()
//!     .unwrap();
//! let descriptor = model.describe().unwrap();
//! let rebuilt = Model::from_descriptor(descriptor).unwrap();
//!
//! let x = Tensor::from([0.1, 0.2, 0.3]);
//! assert_eq!(model.predict(&x).unwrap(), rebuilt.predict(&x).unwrap());
//! ```

use briny::prelude::{TrustedData, Validate, ValidationError};

use crate::error::{Error, Result};
use crate::nn::{Activation, Convolution, Dense, Flatten, Model};
use crate::ops::{Padding, PaddingMode, Stride};

/// Snapshot of a whole model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Dimensions of the model input.
    pub input_shape: Vec<usize>,
    /// Layers, first to last.
    pub layers: Vec<LayerDescriptor>,
}

/// Snapshot of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDescriptor {
    /// Variant tag: `"dense"`, `"convolution"` or `"flatten"`.
    pub kind: String,
    /// Activation tag, as printed by [`Activation`]'s `Display`.
    pub activation: String,
    /// Variant-specific dimensions.
    pub dims: Vec<usize>,
    /// Row-major weights or kernels.
    pub weights: Vec<f32>,
    /// Bias values.
    pub bias: Vec<f32>,
    /// Convolution padding.
    pub padding: Option<PaddingDescriptor>,
    /// Convolution stride as `(height, width)`.
    pub stride: Option<(usize, usize)>,
}

/// Padding of a convolution layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddingDescriptor {
    /// Padding mode tag.
    pub mode: String,
    /// Rows added above and below.
    pub height: usize,
    /// Columns added left and right.
    pub width: usize,
}

impl LayerDescriptor {
    fn problem(&self) -> Option<String> {
        if let Some(i) = self.weights.iter().chain(&self.bias).position(|x| !x.is_finite()) {
            return Some(format!("{} layer holds a non-finite parameter at {i}", self.kind));
        }
        let conv_only = self.padding.is_some() || self.stride.is_some();
        match self.kind.as_str() {
            "dense" => match self.dims.as_slice() {
                &[units] if units > 0 && self.bias.len() == units && !conv_only => {
                    (self.weights.len() % units != 0)
                        .then(|| format!("dense weights do not split into {units} rows"))
                }
                _ => Some(format!("malformed dense layer with dims {:?}", self.dims)),
            },
            "convolution" => match self.dims.as_slice() {
                &[filters, kh, kw] if filters > 0 && kh > 0 && kw > 0 && self.bias.len() == filters => {
                    if self.weights.len() % (filters * kh * kw) != 0 {
                        Some(format!("convolution weights do not split into {filters} filters"))
                    } else if matches!(self.stride, Some((0, _) | (_, 0))) {
                        Some("convolution stride must be positive".to_owned())
                    } else {
                        None
                    }
                }
                _ => Some(format!("malformed convolution layer with dims {:?}", self.dims)),
            },
            "flatten" => (!self.dims.is_empty()
                || !self.weights.is_empty()
                || !self.bias.is_empty()
                || conv_only)
                .then(|| "flatten layer carries parameters".to_owned()),
            // unknown tags are reported when the layer is rebuilt
            _ => None,
        }
    }
}

impl ModelDescriptor {
    fn problem(&self) -> Option<String> {
        if self.input_shape.is_empty() || self.input_shape.contains(&0) {
            return Some(format!("unusable input shape {:?}", self.input_shape));
        }
        if self.layers.is_empty() {
            return Some("descriptor has no layers".to_owned());
        }
        self.layers.iter().find_map(LayerDescriptor::problem)
    }
}

impl Validate for LayerDescriptor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        match self.problem() {
            Some(_) => Err(ValidationError),
            None => Ok(()),
        }
    }
}

impl Validate for ModelDescriptor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        match self.problem() {
            Some(_) => Err(ValidationError),
            None => Ok(()),
        }
    }
}

impl Model {
    /// Snapshots the topology and current parameter values.
    ///
    /// # Errors
    ///
    /// [`Error::UnregisteredParameter`] if a layer's parameters are missing
    /// from the arena.
    pub fn describe(&self) -> Result<ModelDescriptor> {
        Ok(ModelDescriptor {
            input_shape: self.input_shape().dims().to_vec(),
            layers: self
                .layers()
                .iter()
                .map(|layer| layer.describe(self.parameters()))
                .collect::<Result<_>>()?,
        })
    }

    /// Validates `descriptor` and rebuilds the model it describes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] for a structurally broken descriptor,
    /// [`Error::UnknownLayer`], [`Error::UnknownActivation`] or
    /// [`Error::UnknownPadding`] for unrecognized tags, and any error of
    /// initializing the layers.
    pub fn from_descriptor(descriptor: ModelDescriptor) -> Result<Self> {
        let reason = descriptor.problem();
        let descriptor = TrustedData::new(descriptor)
            .map_err(|_| {
                Error::InvalidDescriptor(reason.unwrap_or_else(|| "rejected by validation".to_owned()))
            })?
            .into_inner();

        let mut builder = Self::builder(descriptor.input_shape).seed(0);
        for layer in descriptor.layers {
            let activation: Activation = layer.activation.parse()?;
            builder = match (layer.kind.as_str(), layer.dims.as_slice()) {
                ("dense", &[units]) => {
                    builder.layer(Dense::from_flat(units, activation, layer.weights, layer.bias))
                }
                ("convolution", &[filters, kh, kw]) => {
                    let padding = match layer.padding {
                        Some(p) => Padding::new(p.mode.parse::<PaddingMode>()?, p.height, p.width),
                        None => Padding::none(),
                    };
                    let stride = layer
                        .stride
                        .map_or_else(Stride::default, |(h, w)| Stride::new(h, w));
                    builder.layer(
                        Convolution::new(filters, kh, kw, activation)
                            .with_flat_parameters(layer.weights, layer.bias)
                            .with_padding(padding)
                            .with_stride(stride),
                    )
                }
                ("flatten", _) => builder.layer(Flatten::new().with_activation(activation)),
                (kind, _) => return Err(Error::UnknownLayer(kind.to_owned())),
            };
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::Tensor;

    fn conv_model() -> Model {
        Model::builder([1, 4, 4])
            .layer(
                Convolution::new(2, 3, 3, Activation::ReLU)
                    .with_padding(Padding::new(PaddingMode::Reflection, 1, 1))
                    .with_stride(Stride::new(2, 2)),
            )
            .layer(Flatten::new())
            .layer(Dense::new(3, Activation::Softmax))
            .seed(42)
            .build()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_predictions() {
        let model = conv_model();
        let descriptor = model.describe().unwrap();
        assert_eq!(descriptor.layers[0].padding.as_ref().unwrap().mode, "reflection");
        assert_eq!(descriptor.layers[0].stride, Some((2, 2)));

        let rebuilt = Model::from_descriptor(descriptor.clone()).unwrap();
        assert_eq!(rebuilt.describe().unwrap(), descriptor);

        let x = Tensor::from_flat(&[1, 4, 4].into(), (0..16).map(|i| i as f32 / 8.0).collect()).unwrap();
        assert_eq!(model.predict(&x).unwrap(), rebuilt.predict(&x).unwrap());
    }

    #[test]
    fn unknown_tags_are_named() {
        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[1].kind = "pooling".into();
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::UnknownLayer(kind)) if kind == "pooling"
        ));

        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[2].activation = "tanh".into();
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::UnknownActivation(_))
        ));

        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[0].padding.as_mut().unwrap().mode = "mirror".into();
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::UnknownPadding(_))
        ));
    }

    #[test]
    fn broken_descriptors_are_rejected() {
        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[2].bias.pop();
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::InvalidDescriptor(_))
        ));

        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[0].weights[0] = f32::NAN;
        assert!(descriptor.validate().is_err());

        let mut descriptor = conv_model().describe().unwrap();
        descriptor.layers[0].stride = Some((0, 1));
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn weights_must_fit_the_rebuilt_geometry() {
        let mut descriptor = conv_model().describe().unwrap();
        // still a whole number of rows, but the wrong fan-in
        let units = descriptor.layers[2].dims[0];
        descriptor.layers[2].weights.truncate(units * 2);
        assert!(matches!(
            Model::from_descriptor(descriptor),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
