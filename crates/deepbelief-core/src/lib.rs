//! # deepbelief-core
//!
//! Data model, file format and backend trait for the deepbelief engine.
//!
//! This crate provides:
//! - [`Dimensions`] / [`Layout`]: shapes, strides and views
//! - [`Buffer`]: shared, possibly quantized, N-dimensional storage
//! - [`Precision`] / [`QuantParams`]: 32, 16 and 8 bit element formats
//! - [`format`]: the tagged binary format model files use
//! - [`Backend`]: the kernel surface implemented by each compute backend

pub mod backend;
pub mod buffer;
pub mod dims;
pub mod error;
pub mod format;
pub mod layout;
pub mod matrix;
pub mod precision;

pub use backend::{Backend, PoolMode, ResponseParams};
pub use buffer::{Buffer, BufferId, Storage};
pub use dims::Dimensions;
pub use error::{Error, ErrorKind, Result};
pub use format::{Tag, TagType};
pub use layout::Layout;
pub use matrix::Operand;
pub use precision::{Precision, QuantParams};
