use crate::buffer::Buffer;
use crate::dims::Dimensions;
use crate::error::{Error, Result};

/// A 2-D window onto a buffer's storage with explicit row and column strides.
///
/// GEMM operands are always handed over in this form, so a kernel can read a
/// transposed weight matrix or a reshaped activation without copying it.
#[derive(Debug, Clone)]
pub struct Operand {
    buffer: Buffer,
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
    offset: usize,
}

impl Operand {
    /// View a rank-2 buffer as a matrix, honouring its layout.
    pub fn matrix(buffer: &Buffer) -> Result<Operand> {
        let (rows, cols) = buffer.dims().as_matrix()?;
        let strides = buffer.layout().strides();
        Ok(Operand {
            buffer: buffer.clone(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            offset: buffer.layout().offset(),
        })
    }

    /// View a compact buffer of any rank as a `rows x cols` matrix.
    pub fn with_shape(buffer: &Buffer, rows: usize, cols: usize) -> Result<Operand> {
        if rows * cols != buffer.element_count() {
            return Err(Error::ReshapeElementMismatch {
                src: buffer.element_count(),
                dst: rows * cols,
                dst_dims: Dimensions::from((rows, cols)),
            });
        }
        if !buffer.layout().is_compact() {
            return Err(Error::NotCompact {
                name: buffer.name().to_string(),
            });
        }
        Ok(Operand {
            buffer: buffer.clone(),
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
            offset: buffer.layout().offset(),
        })
    }

    /// Swap the roles of rows and columns. No data moves.
    pub fn transposed(self) -> Operand {
        Operand {
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
            ..self
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn col_stride(&self) -> usize {
        self.col_stride
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Storage index of element (row, col).
    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        self.offset + row * self.row_stride + col * self.col_stride
    }

    /// Whether the storage holds the matrix densely in row-major order.
    pub fn is_row_major(&self) -> bool {
        self.col_stride == 1 && self.row_stride == self.cols
    }

    /// Dense row-major copy of the values, dequantized.
    pub fn to_row_major(&self) -> Result<Vec<f32>> {
        let storage = self.buffer.storage()?;
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for row in 0..self.rows {
            for col in 0..self.cols {
                out.push(storage.value(self.index(row, col)));
            }
        }
        Ok(out)
    }
}

/// Check `A (m x k) * B (k x n)` against an optional `C (m x n)`.
pub fn check_gemm_shapes(a: &Operand, b: &Operand, c: Option<&Buffer>) -> Result<(usize, usize, usize)> {
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    if b.rows() != k {
        return Err(Error::MatmulShapeMismatch {
            m,
            k1: k,
            k2: b.rows(),
            n,
        });
    }
    if let Some(c) = c {
        let expected = Dimensions::from((m, n));
        if c.dims() != &expected {
            return Err(Error::ShapeMismatch {
                expected,
                got: c.dims().clone(),
            });
        }
    }
    Ok((m, k, n))
}
