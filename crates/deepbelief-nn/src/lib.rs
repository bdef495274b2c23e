//! # deepbelief-nn
//!
//! The layers a deepbelief graph is built from, and the sequence that runs
//! them.
//!
//! 1. **Module trait**: every layer implements `forward(backend, input)`
//! 2. **Conv / GroupedConv**: convolution lowered onto GEMM
//! 3. **Neuron**: fully connected, optionally with transposed weights
//! 4. **Pool / Normalize**: pooling and local response normalization
//! 5. **Relu / Softmax / Dropout / Flat**: the single-kernel layers
//! 6. **Layer**: the closed enum a layer tag decodes into
//! 7. **Sequential**: ordered execution with the relu dedup rule
//!
//! Layers hold no backend; the same loaded graph runs on any [`Backend`].
//!
//! [`Backend`]: deepbelief_core::Backend

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod flatten;
pub mod layer;
pub mod module;
pub mod neuron;
pub mod normalize;
pub mod pool;
pub mod sequential;

pub use activation::{Relu, Softmax};
pub use conv::{Conv, GroupedConv};
pub use dropout::Dropout;
pub use flatten::Flat;
pub use layer::Layer;
pub use module::Module;
pub use neuron::Neuron;
pub use normalize::Normalize;
pub use pool::Pool;
pub use sequential::Sequential;
