use crate::dims::Dimensions;
use crate::error::{Error, Result};

// Layout — how a buffer's logical shape maps onto flat storage
//
// A view never copies: it only changes the dims, strides and starting offset
// used to address the shared storage. Selecting one item along the outermost
// axis just bumps the offset; cutting a subregion keeps the parent's strides
// so the rows of the region are no longer adjacent.

/// Dimensions plus per-axis strides and a starting offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    dims: Dimensions,
    strides: Vec<usize>,
    offset: usize,
}

impl Layout {
    /// Dense row-major layout starting at element zero.
    pub fn contiguous(dims: Dimensions) -> Self {
        let strides = dims.strides();
        Layout {
            dims,
            strides,
            offset: 0,
        }
    }

    pub fn new(dims: Dimensions, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            dims,
            strides,
            offset,
        }
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn element_count(&self) -> usize {
        self.dims.element_count()
    }

    /// Row-major strides, wherever the data starts.
    pub fn is_compact(&self) -> bool {
        self.strides == self.dims.strides()
    }

    /// Row-major strides and starting at element zero.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.is_compact()
    }

    /// Storage index of an index tuple.
    pub fn storage_index(&self, indices: &[usize]) -> Result<usize> {
        let sizes = self.dims.sizes();
        if indices.len() != sizes.len() {
            return Err(Error::RankMismatch {
                expected: sizes.len(),
                got: indices.len(),
            });
        }
        let mut index = self.offset;
        for (dim, ((&i, &size), &stride)) in indices
            .iter()
            .zip(sizes.iter())
            .zip(self.strides.iter())
            .enumerate()
        {
            if i >= size {
                return Err(Error::IndexOutOfRange {
                    dim,
                    index: i,
                    size,
                });
            }
            index += i * stride;
        }
        Ok(index)
    }

    /// Highest storage index this layout touches, plus one.
    pub fn required_storage(&self) -> usize {
        if self.element_count() == 0 {
            return self.offset;
        }
        self.offset
            + self
                .dims
                .sizes()
                .iter()
                .zip(self.strides.iter())
                .map(|(&size, &stride)| (size - 1) * stride)
                .sum::<usize>()
            + 1
    }

    /// Storage indices of every element in logical row-major order.
    pub fn storage_indices(&self) -> StorageIndices<'_> {
        StorageIndices {
            layout: self,
            position: vec![0; self.dims.rank()],
            remaining: self.element_count(),
        }
    }

    /// Drop the outermost axis, keeping item `index` of it.
    pub fn select_top(&self, index: usize) -> Result<Layout> {
        let size = self.dims.size(0)?;
        if index >= size {
            return Err(Error::IndexOutOfRange { dim: 0, index, size });
        }
        Ok(Layout {
            dims: self.dims.remove_dimensions(1)?,
            strides: self.strides[1..].to_vec(),
            offset: self.offset + index * self.strides[0],
        })
    }

    /// Region starting at `origin` with the given dims, same strides.
    pub fn subregion(&self, origin: &[usize], dims: &Dimensions) -> Result<Layout> {
        let sizes = self.dims.sizes();
        if origin.len() != sizes.len() || dims.rank() != sizes.len() {
            return Err(Error::RankMismatch {
                expected: sizes.len(),
                got: origin.len().max(dims.rank()),
            });
        }
        for (dim, ((&start, &len), &size)) in origin
            .iter()
            .zip(dims.sizes().iter())
            .zip(sizes.iter())
            .enumerate()
        {
            if start + len > size {
                return Err(Error::IndexOutOfRange {
                    dim,
                    index: start + len - 1,
                    size,
                });
            }
        }
        let offset = self.offset
            + origin
                .iter()
                .zip(self.strides.iter())
                .map(|(&start, &stride)| start * stride)
                .sum::<usize>();
        Ok(Layout {
            dims: dims.clone(),
            strides: self.strides.clone(),
            offset,
        })
    }

    /// Same storage read with new dims. Only compact layouts can be reshaped.
    pub fn reshape(&self, dims: Dimensions) -> Result<Layout> {
        if dims.element_count() != self.element_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.element_count(),
                dst: dims.element_count(),
                dst_dims: dims,
            });
        }
        if !self.is_compact() {
            return Err(Error::NotCompact {
                name: format!("layout {}", self.dims),
            });
        }
        let strides = dims.strides();
        Ok(Layout {
            dims,
            strides,
            offset: self.offset,
        })
    }
}

/// Iterator over the storage indices of a layout in logical order.
pub struct StorageIndices<'a> {
    layout: &'a Layout,
    position: Vec<usize>,
    remaining: usize,
}

impl Iterator for StorageIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let index = self.layout.offset
            + self
                .position
                .iter()
                .zip(self.layout.strides.iter())
                .map(|(&p, &s)| p * s)
                .sum::<usize>();
        let sizes = self.layout.dims.sizes();
        for dim in (0..self.position.len()).rev() {
            self.position[dim] += 1;
            if self.position[dim] < sizes[dim] {
                break;
            }
            self.position[dim] = 0;
        }
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StorageIndices<'_> {}
