use core::fmt;

/// Dimensions of a tensor, highest rank first.
///
/// `[3, 4]` is a matrix with three rows of four columns, `[2, 3, 4]` is a
/// composite of two `[3, 4]` slices. The element count is the product of the
/// dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Creates a shape from its dimensions.
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// The dimensions as a slice.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Size of dimension `axis`, if it exists.
    #[must_use]
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied()
    }

    /// The shape of one slice of a tensor with this shape (drops the highest dimension).
    #[must_use]
    pub fn lower(&self) -> Self {
        Self(self.0.iter().skip(1).copied().collect())
    }

    /// Prepends a new highest dimension.
    #[must_use]
    pub fn raise(&self, outer: usize) -> Self {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(outer);
        dims.extend_from_slice(&self.0);
        Self(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_and_slices() {
        let s = Shape::from([2, 3, 4]);
        assert_eq!(s.size(), 24);
        assert_eq!(s.rank(), 3);
        assert_eq!(s.lower(), Shape::from([3, 4]));
        assert_eq!(s.lower().raise(2), s);
        assert_eq!(s.to_string(), "[2, 3, 4]");
    }
}
