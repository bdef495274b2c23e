//! # deepbelief-cpu
//!
//! Sequential reference implementation of every kernel. The accelerated
//! backend is checked against these results and reuses them for the kernels
//! it does not map onto its substrate.

pub mod channels;
pub mod elementwise;
pub mod gemm;
pub mod patches;
pub mod pool;
pub mod response;
pub mod softmax;

use deepbelief_core::{Backend, Buffer, Operand, PoolMode, ResponseParams, Result};
use tracing::trace;

pub use patches::conv_output_size;
pub use pool::pool_output_size;

/// The reference backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn gemm(
        &self,
        alpha: f32,
        a: &Operand,
        b: &Operand,
        beta: f32,
        c: Option<&Buffer>,
    ) -> Result<Buffer> {
        trace!(m = a.rows(), k = a.cols(), n = b.cols(), "cpu gemm");
        gemm::gemm(alpha, a, b, beta, c)
    }

    fn patches_into_rows(&self, input: &Buffer, kernel: usize, stride: usize) -> Result<Buffer> {
        patches::patches_into_rows(input, kernel, stride)
    }

    fn insert_margin(&self, input: &Buffer, margin: usize, value: f32) -> Result<Buffer> {
        patches::insert_margin(input, margin, value)
    }

    fn extract_channels(&self, input: &Buffer, start: usize, count: usize) -> Result<Buffer> {
        channels::extract_channels(input, start, count)
    }

    fn join_channels(&self, inputs: &[Buffer]) -> Result<Buffer> {
        channels::join_channels(inputs)
    }

    fn pool_patches(
        &self,
        input: &Buffer,
        mode: PoolMode,
        size: usize,
        stride: usize,
    ) -> Result<Buffer> {
        pool::pool_patches(input, mode, size, stride)
    }

    fn local_response(&self, input: &Buffer, params: ResponseParams) -> Result<Buffer> {
        response::local_response(input, params)
    }

    fn softmax(&self, input: &Buffer) -> Result<Buffer> {
        softmax::softmax(input)
    }

    fn max_scalar(&self, input: &Buffer, value: f32) -> Result<Buffer> {
        elementwise::max_scalar(input, value)
    }

    fn add_bias(&self, input: &Buffer, bias: &Buffer) -> Result<Buffer> {
        elementwise::add_bias(input, bias)
    }

    fn scale(&self, input: &Buffer, factor: f32) -> Result<Buffer> {
        elementwise::scale(input, factor)
    }
}
