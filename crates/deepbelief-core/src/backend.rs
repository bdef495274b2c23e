use std::fmt;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::matrix::Operand;

// Backend — the kernel surface every compute backend provides
//
// Layers never touch storage directly; they describe their work as a short
// sequence of these calls. The CPU backend is the sequential reference, the
// accelerated backend maps the heavy kernels onto a data-parallel substrate
// and falls back to the reference for the rest.
//
// Every call blocks until its result is materialized in host memory, so the
// order of effects is always the order of the calls.
//
// Image operands are (batch, height, width, channels) with channels innermost.

/// Reduction applied over each pooling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Max,
    Average,
}

impl PoolMode {
    pub fn parse(name: &str) -> Option<PoolMode> {
        match name {
            "max" => Some(PoolMode::Max),
            "average" | "avg" => Some(PoolMode::Average),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PoolMode::Max => "max",
            PoolMode::Average => "average",
        }
    }
}

/// Parameters of local response normalization across channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseParams {
    /// Window length in channels, centred on the channel being normalized.
    pub window: usize,
    pub k: f32,
    pub alpha: f32,
    pub beta: f32,
}

/// A compute backend.
pub trait Backend: fmt::Debug + Send + Sync {
    /// Short identifier used in logs ("cpu", "accel").
    fn name(&self) -> &'static str;

    /// `alpha * A * B + beta * C`, returned as a new dense (m x n) buffer.
    ///
    /// `c` of `None` behaves like a zero matrix. Quantized operands are
    /// dequantized element by element while accumulating.
    ///
    /// `b` is treated as a long-lived weight operand: a backend may keep
    /// state derived from it, keyed by the buffer handle, until that buffer
    /// is released or the backend is dropped. Pass per-call data as `a`.
    fn gemm(
        &self,
        alpha: f32,
        a: &Operand,
        b: &Operand,
        beta: f32,
        c: Option<&Buffer>,
    ) -> Result<Buffer>;

    /// Unroll every `kernel x kernel` patch at `stride` into one row.
    ///
    /// (N, H, W, C) becomes (N, outH * outW, kernel * kernel * C), with
    /// `out = ceil((size - kernel) / stride) + 1`. Patches hanging over the
    /// right or bottom edge read zeros outside the image.
    fn patches_into_rows(&self, input: &Buffer, kernel: usize, stride: usize) -> Result<Buffer>;

    /// Pad both spatial axes by `margin` on every side with `value`.
    fn insert_margin(&self, input: &Buffer, margin: usize, value: f32) -> Result<Buffer>;

    /// Copy of channels `[start, start + count)`.
    fn extract_channels(&self, input: &Buffer, start: usize, count: usize) -> Result<Buffer>;

    /// Concatenate along the channel axis, in order.
    fn join_channels(&self, inputs: &[Buffer]) -> Result<Buffer>;

    /// Pool each channel over `size x size` windows at `stride`.
    ///
    /// `out = floor((size_in - size) / stride) + 1`; window samples past the
    /// last row or column are clamped onto it.
    fn pool_patches(&self, input: &Buffer, mode: PoolMode, size: usize, stride: usize)
        -> Result<Buffer>;

    /// Local response normalization across neighbouring channels.
    fn local_response(&self, input: &Buffer, params: ResponseParams) -> Result<Buffer>;

    /// Numerically stable softmax over the last axis of a (rows, cols) buffer.
    fn softmax(&self, input: &Buffer) -> Result<Buffer>;

    /// Elementwise `max(x, value)`.
    fn max_scalar(&self, input: &Buffer, value: f32) -> Result<Buffer>;

    /// Add a bias vector to every row; the bias length is the last axis.
    fn add_bias(&self, input: &Buffer, bias: &Buffer) -> Result<Buffer>;

    /// Elementwise multiplication by a constant.
    fn scale(&self, input: &Buffer, factor: f32) -> Result<Buffer>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn gemm(
        &self,
        alpha: f32,
        a: &Operand,
        b: &Operand,
        beta: f32,
        c: Option<&Buffer>,
    ) -> Result<Buffer> {
        (**self).gemm(alpha, a, b, beta, c)
    }
    fn patches_into_rows(&self, input: &Buffer, kernel: usize, stride: usize) -> Result<Buffer> {
        (**self).patches_into_rows(input, kernel, stride)
    }
    fn insert_margin(&self, input: &Buffer, margin: usize, value: f32) -> Result<Buffer> {
        (**self).insert_margin(input, margin, value)
    }
    fn extract_channels(&self, input: &Buffer, start: usize, count: usize) -> Result<Buffer> {
        (**self).extract_channels(input, start, count)
    }
    fn join_channels(&self, inputs: &[Buffer]) -> Result<Buffer> {
        (**self).join_channels(inputs)
    }
    fn pool_patches(
        &self,
        input: &Buffer,
        mode: PoolMode,
        size: usize,
        stride: usize,
    ) -> Result<Buffer> {
        (**self).pool_patches(input, mode, size, stride)
    }
    fn local_response(&self, input: &Buffer, params: ResponseParams) -> Result<Buffer> {
        (**self).local_response(input, params)
    }
    fn softmax(&self, input: &Buffer) -> Result<Buffer> {
        (**self).softmax(input)
    }
    fn max_scalar(&self, input: &Buffer, value: f32) -> Result<Buffer> {
        (**self).max_scalar(input, value)
    }
    fn add_bias(&self, input: &Buffer, bias: &Buffer) -> Result<Buffer> {
        (**self).add_bias(input, bias)
    }
    fn scale(&self, input: &Buffer, factor: f32) -> Result<Buffer> {
        (**self).scale(input, factor)
    }
}
