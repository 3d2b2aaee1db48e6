//! Padding schemes and stride for 2D convolution.
//!
//! A padding scheme decides what an out-of-range read returns. Rather than
//! materializing a padded copy of the input, each scheme maps a (possibly
//! negative or too large) index back into the tensor, or to `None` when the
//! read contributes nothing. The same mapping drives the forward pass, the
//! kernel gradient and the scatter-add of the transposed convolution, which is
//! what keeps the three mutually consistent.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::tensors::Matrix;

/// How reads outside the input are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PaddingMode {
    /// Out-of-range reads are zero.
    #[default]
    Zero,
    /// Indices wrap around modulo the dimension.
    Circular,
    /// Indices mirror at the border without repeating the edge.
    Reflection,
    /// Indices clamp to the nearest edge.
    Replication,
}

impl PaddingMode {
    /// Maps `index` along an axis of length `dim` to the index that is
    /// actually read, or `None` when the read contributes nothing.
    #[must_use]
    pub fn map_index(self, index: isize, dim: usize) -> Option<usize> {
        if dim == 0 {
            return None;
        }
        let m = isize::try_from(dim).ok()?;
        let mapped = match self {
            Self::Zero => (0..m).contains(&index).then_some(index)?,
            Self::Circular => index.rem_euclid(m),
            Self::Reflection if m == 1 => 0,
            Self::Reflection => {
                let period = 2 * (m - 1);
                let r = index.rem_euclid(period);
                if r >= m { period - r } else { r }
            }
            Self::Replication => index.clamp(0, m - 1),
        };
        usize::try_from(mapped).ok()
    }

    /// Reads `matrix[i, j]` through this scheme.
    #[must_use]
    pub fn sample(self, matrix: &Matrix, i: isize, j: isize) -> f32 {
        match (
            self.map_index(i, matrix.rows()),
            self.map_index(j, matrix.cols()),
        ) {
            (Some(r), Some(c)) => matrix[(r, c)],
            _ => 0.0,
        }
    }

    /// The registry name of this scheme.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Circular => "circular",
            Self::Reflection => "reflection",
            Self::Replication => "replication",
        }
    }
}

impl fmt::Display for PaddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PaddingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(Self::Zero),
            "circular" => Ok(Self::Circular),
            "reflection" => Ok(Self::Reflection),
            "replication" => Ok(Self::Replication),
            _ => Err(Error::UnknownPadding(s.to_owned())),
        }
    }
}

/// Padding amount on each side of both spatial axes, plus the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    /// Read resolution for out-of-range indices.
    pub mode: PaddingMode,
    /// Rows added above and below.
    pub height: usize,
    /// Columns added left and right.
    pub width: usize,
}

impl Padding {
    /// No padding at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            mode: PaddingMode::Zero,
            height: 0,
            width: 0,
        }
    }

    /// `height` rows and `width` columns on each side, resolved with `mode`.
    #[must_use]
    pub const fn new(mode: PaddingMode, height: usize, width: usize) -> Self {
        Self {
            mode,
            height,
            width,
        }
    }
}

/// Step between consecutive kernel placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    /// Vertical step.
    pub height: usize,
    /// Horizontal step.
    pub width: usize,
}

impl Stride {
    /// A stride of `height` rows and `width` columns.
    #[must_use]
    pub const fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Fails with [`Error::InvalidGeometry`] if either step is zero.
    pub fn validate(self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(Error::InvalidGeometry(format!(
                "stride must be positive, got {}x{}",
                self.height, self.width
            )));
        }
        Ok(())
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflection_mirrors_without_repeating_the_edge() {
        let m = PaddingMode::Reflection;
        assert_eq!(m.map_index(-1, 4), Some(1));
        assert_eq!(m.map_index(-3, 4), Some(3));
        assert_eq!(m.map_index(4, 4), Some(2));
        assert_eq!(m.map_index(5, 4), Some(1));
        // wider than the tensor: bounce again
        assert_eq!(m.map_index(-4, 4), Some(2));
        assert_eq!(m.map_index(7, 4), Some(1));
        assert_eq!(m.map_index(-5, 1), Some(0));
    }

    #[test]
    fn other_modes() {
        assert_eq!(PaddingMode::Zero.map_index(-1, 3), None);
        assert_eq!(PaddingMode::Zero.map_index(2, 3), Some(2));
        assert_eq!(PaddingMode::Circular.map_index(-1, 3), Some(2));
        assert_eq!(PaddingMode::Circular.map_index(7, 3), Some(1));
        assert_eq!(PaddingMode::Replication.map_index(-9, 3), Some(0));
        assert_eq!(PaddingMode::Replication.map_index(9, 3), Some(2));
    }

    #[test]
    fn registry_names() {
        for mode in [
            PaddingMode::Zero,
            PaddingMode::Circular,
            PaddingMode::Reflection,
            PaddingMode::Replication,
        ] {
            assert_eq!(mode.to_string().parse::<PaddingMode>().unwrap(), mode);
        }
        assert!(matches!(
            "mirror".parse::<PaddingMode>(),
            Err(Error::UnknownPadding(_))
        ));
    }
}
