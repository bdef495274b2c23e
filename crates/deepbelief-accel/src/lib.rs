// Accelerated Backend — kernels mapped onto a data-parallel texture substrate
//
// GEMM, pooling and the scalar max run as texture programs; every other
// kernel is cheap enough to run on the host reference implementation.
//
// ARCHITECTURE:
// - Substrate owns the textures and runs dispatches over the rayon pool
// - TextureCache keeps weight textures resident between forward passes,
//   keyed by buffer identity and invalidated when the buffer is written;
//   past its capacity the least recently used texture goes
// - Quantized weights are uploaded as raw codes; the fetch transform of the
//   texture expands them inside the program
// - Results are read back through RGBA8 byte encoding unless the config
//   enables float readback
//
// USAGE:
//   let backend = AccelBackend::new(AccelConfig::default());
//   let out = backend.gemm(1.0, &a, &b, 0.0, None)?;
//   backend.release_all();

pub mod cache;
pub mod config;
mod kernels;
pub mod pack;
pub mod substrate;

use std::fmt;
use std::sync::Arc;

use deepbelief_core::{Backend, Buffer, Operand, PoolMode, ResponseParams, Result};
use deepbelief_cpu as cpu;

pub use cache::{CacheStats, TextureCache};
pub use config::{AccelConfig, DEFAULT_MAX_CACHED_TEXTURES};
pub use substrate::{Substrate, SubstrateStats, TextureShape};

/// The accelerated backend. Cheap to share by reference across layers.
pub struct AccelBackend {
    substrate: Arc<Substrate>,
    cache: TextureCache,
    config: AccelConfig,
}

impl AccelBackend {
    pub fn new(config: AccelConfig) -> Self {
        tracing::debug!(
            max_texture_size = config.max_texture_size,
            packed = config.packed_layout,
            max_cached = config.max_cached_textures,
            "accelerated backend ready"
        );
        AccelBackend {
            substrate: Arc::new(Substrate::new(&config)),
            cache: TextureCache::with_capacity(config.max_cached_textures),
            config,
        }
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn substrate_stats(&self) -> SubstrateStats {
        self.substrate.stats()
    }

    /// Textures currently alive on the substrate, cached ones included.
    pub fn live_textures(&self) -> usize {
        self.substrate.live_textures()
    }

    /// Drop the cached textures uploaded from `buffer`.
    pub fn release(&self, buffer: &Buffer) -> usize {
        self.cache.release(buffer.id())
    }

    /// Drop every cached texture.
    pub fn release_all(&self) -> usize {
        self.cache.clear()
    }
}

impl Default for AccelBackend {
    fn default() -> Self {
        Self::new(AccelConfig::default())
    }
}

impl fmt::Debug for AccelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelBackend")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .field("substrate", &self.substrate)
            .finish()
    }
}

impl Backend for AccelBackend {
    fn name(&self) -> &'static str {
        "accel"
    }

    fn gemm(
        &self,
        alpha: f32,
        a: &Operand,
        b: &Operand,
        beta: f32,
        c: Option<&Buffer>,
    ) -> Result<Buffer> {
        kernels::gemm(&self.substrate, &self.cache, &self.config, alpha, a, b, beta, c)
    }

    fn patches_into_rows(&self, input: &Buffer, kernel: usize, stride: usize) -> Result<Buffer> {
        cpu::patches::patches_into_rows(input, kernel, stride)
    }

    fn insert_margin(&self, input: &Buffer, margin: usize, value: f32) -> Result<Buffer> {
        cpu::patches::insert_margin(input, margin, value)
    }

    fn extract_channels(&self, input: &Buffer, start: usize, count: usize) -> Result<Buffer> {
        cpu::channels::extract_channels(input, start, count)
    }

    fn join_channels(&self, inputs: &[Buffer]) -> Result<Buffer> {
        cpu::channels::join_channels(inputs)
    }

    fn pool_patches(
        &self,
        input: &Buffer,
        mode: PoolMode,
        size: usize,
        stride: usize,
    ) -> Result<Buffer> {
        kernels::pool_patches(&self.substrate, input, mode, size, stride)
    }

    fn local_response(&self, input: &Buffer, params: ResponseParams) -> Result<Buffer> {
        cpu::response::local_response(input, params)
    }

    fn softmax(&self, input: &Buffer) -> Result<Buffer> {
        cpu::softmax::softmax(input)
    }

    fn max_scalar(&self, input: &Buffer, value: f32) -> Result<Buffer> {
        kernels::max_scalar(&self.substrate, input, value)
    }

    fn add_bias(&self, input: &Buffer, bias: &Buffer) -> Result<Buffer> {
        cpu::elementwise::add_bias(input, bias)
    }

    fn scale(&self, input: &Buffer, factor: f32) -> Result<Buffer> {
        cpu::elementwise::scale(input, factor)
    }
}
