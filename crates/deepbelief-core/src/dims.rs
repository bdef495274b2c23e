use std::fmt;

use crate::error::{Error, Result};

// Dimensions — ordered shape of a buffer, outermost to innermost
//
// Images flow through the network as (batch, height, width, channels) with the
// channel dimension innermost, so neighbouring channels of one pixel sit next
// to each other in memory. The offset of an index tuple is the usual
// row-major dot product with the contiguous strides:
//
//   dims    (2, 3, 4)
//   strides (12, 4, 1)
//   offset(1, 2, 3) = 12 + 8 + 3 = 23

/// Shape of an N-dimensional buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimensions(Vec<usize>);

impl Dimensions {
    pub fn new(sizes: Vec<usize>) -> Self {
        Dimensions(sizes)
    }

    /// Build from sizes read off a file, rejecting zero-sized axes and
    /// shapes whose element count does not fit in a `usize`.
    pub fn try_new(sizes: Vec<usize>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(Error::msg("dimensions must have at least one axis"));
        }
        if let Some(pos) = sizes.iter().position(|&s| s == 0) {
            return Err(Error::msg(format!(
                "dimension {pos} of {} has size zero",
                Dimensions(sizes.clone())
            )));
        }
        if sizes.iter().try_fold(1usize, |n, &s| n.checked_mul(s)).is_none() {
            return Err(Error::malformed(
                0,
                format!("element count of {} overflows", Dimensions(sizes.clone())),
            ));
        }
        Ok(Dimensions(sizes))
    }

    pub fn sizes(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of all sizes.
    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    pub fn size(&self, dim: usize) -> Result<usize> {
        self.0.get(dim).copied().ok_or(Error::RankMismatch {
            expected: dim + 1,
            got: self.rank(),
        })
    }

    /// Size of the innermost dimension.
    pub fn last(&self) -> usize {
        self.0.last().copied().unwrap_or(1)
    }

    /// Row-major strides: the last axis has stride 1.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        let mut acc = 1usize;
        for (stride, size) in strides.iter_mut().zip(self.0.iter()).rev() {
            *stride = acc;
            acc *= *size;
        }
        strides
    }

    /// Linear offset of an index tuple.
    ///
    /// Fails when the tuple has the wrong length or any index is out of range,
    /// so every value returned lies in `[0, element_count())`.
    pub fn offset(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.rank() {
            return Err(Error::RankMismatch {
                expected: self.rank(),
                got: indices.len(),
            });
        }
        let mut offset = 0usize;
        for (dim, (&index, &size)) in indices.iter().zip(self.0.iter()).enumerate() {
            if index >= size {
                return Err(Error::IndexOutOfRange { dim, index, size });
            }
            offset = offset * size + index;
        }
        Ok(offset)
    }

    /// Drop the `count` outermost dimensions.
    pub fn remove_dimensions(&self, count: usize) -> Result<Dimensions> {
        if count > self.rank() {
            return Err(Error::RankMismatch {
                expected: count,
                got: self.rank(),
            });
        }
        Ok(Dimensions(self.0[count..].to_vec()))
    }

    /// Copy with one dimension replaced.
    pub fn with_size(&self, dim: usize, size: usize) -> Result<Dimensions> {
        let mut sizes = self.0.clone();
        let rank = sizes.len();
        match sizes.get_mut(dim) {
            Some(slot) => *slot = size,
            None => {
                return Err(Error::RankMismatch {
                    expected: dim + 1,
                    got: rank,
                })
            }
        }
        Ok(Dimensions(sizes))
    }

    pub fn are_equal_to(&self, other: &Dimensions) -> bool {
        self == other
    }

    /// Require a rank-4 (batch, height, width, channels) shape.
    pub fn as_image(&self) -> Result<(usize, usize, usize, usize)> {
        match self.0.as_slice() {
            &[n, h, w, c] => Ok((n, h, w, c)),
            _ => Err(Error::RankMismatch {
                expected: 4,
                got: self.rank(),
            }),
        }
    }

    /// Require a rank-2 (rows, columns) shape.
    pub fn as_matrix(&self) -> Result<(usize, usize)> {
        match self.0.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            }),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, size) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{size}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Dimensions {
    fn from(sizes: Vec<usize>) -> Self {
        Dimensions(sizes)
    }
}

impl From<&[usize]> for Dimensions {
    fn from(sizes: &[usize]) -> Self {
        Dimensions(sizes.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Dimensions {
    fn from(sizes: [usize; N]) -> Self {
        Dimensions(sizes.to_vec())
    }
}

impl From<usize> for Dimensions {
    fn from(size: usize) -> Self {
        Dimensions(vec![size])
    }
}

impl From<(usize, usize)> for Dimensions {
    fn from((a, b): (usize, usize)) -> Self {
        Dimensions(vec![a, b])
    }
}

impl From<(usize, usize, usize)> for Dimensions {
    fn from((a, b, c): (usize, usize, usize)) -> Self {
        Dimensions(vec![a, b, c])
    }
}

impl From<(usize, usize, usize, usize)> for Dimensions {
    fn from((a, b, c, d): (usize, usize, usize, usize)) -> Self {
        Dimensions(vec![a, b, c, d])
    }
}
