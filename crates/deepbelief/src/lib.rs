//! # deepbelief
//!
//! Convolutional network inference for embedded targets: load a graph file,
//! feed it an image, read back per-label scores.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deepbelief::prelude::*;
//!
//! # fn main() -> deepbelief::Result<()> {
//! let bytes = std::fs::read("network.ntwk").map_err(|e| Error::msg(e.to_string()))?;
//! let network = Network::from_bytes(&bytes, CpuBackend)?;
//! let image = Buffer::zeros([256, 256, 3]);
//! for p in top_predictions(&network.classify(&image)?, 5) {
//!     println!("{:.4} {}", p.score, p.label);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `deepbelief-core` | Buffer, Dimensions, quantized storage, Backend trait, graph file format |
//! | `deepbelief-cpu` | Reference kernels: GEMM, patches, pooling, normalization, softmax |
//! | `deepbelief-accel` | Texture substrate backend with a resident weight cache |
//! | `deepbelief-nn` | Layers and the Sequential runner |
//!
//! ## Modules
//!
//! - [`config`]: engine settings (crop size, multi-sample, flip)
//! - [`prepare`]: rescale, crop and mean subtraction of input images
//! - [`network`]: graph loading, running, classification and saving

/// Re-export core types.
pub use deepbelief_core::{
    bail, Backend, Buffer, BufferId, Dimensions, Error, ErrorKind, Layout, Operand, PoolMode,
    Precision, QuantParams, ResponseParams, Result, Storage, Tag, TagType,
};

/// Re-export the graph file format.
pub mod format {
    pub use deepbelief_core::format::*;
}

/// Re-export the reference backend.
pub use deepbelief_cpu::CpuBackend;

/// Re-export the accelerated backend.
pub use deepbelief_accel::{AccelBackend, AccelConfig, CacheStats, SubstrateStats};

/// Re-export the layers.
pub mod nn {
    pub use deepbelief_nn::*;
}

/// Engine settings.
pub mod config;

/// Graph loading and execution.
pub mod network;

/// Input image preparation.
pub mod prepare;

pub use config::EngineConfig;
pub use network::{top_predictions, Network, Prediction};
pub use prepare::PrepareInput;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{Layer, Module, Sequential};
    pub use crate::{
        top_predictions, AccelBackend, AccelConfig, Backend, Buffer, CpuBackend, Dimensions,
        EngineConfig, Error, Network, Prediction, PrepareInput, Result,
    };
}
