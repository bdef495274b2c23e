// Activation layers — Relu and the final softmax
//
// Both are thin wrappers over a single backend kernel. The softmax layer is
// stored under the class name "max" and normalizes each row of its
// (batch, classes) input.

use deepbelief_core::{Backend, Buffer, Result, Tag};

use crate::layer::header;
use crate::module::Module;

/// ReLU activation: max(x, 0)
#[derive(Debug, Clone)]
pub struct Relu {
    name: String,
}

impl Relu {
    pub fn new(name: impl Into<String>) -> Self {
        Relu { name: name.into() }
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        Ok(Relu::new(tag.require_str("name")?))
    }

    pub fn to_tag(&self) -> Tag<'static> {
        Tag::dict(header("relu", &self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend + ?Sized> Module<B> for Relu {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        Ok(backend.max_scalar(input, 0.0)?.with_name(&self.name))
    }
}

/// Row-wise softmax over class scores.
#[derive(Debug, Clone)]
pub struct Softmax {
    name: String,
}

impl Softmax {
    pub fn new(name: impl Into<String>) -> Self {
        Softmax { name: name.into() }
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        Ok(Softmax::new(tag.require_str("name")?))
    }

    pub fn to_tag(&self) -> Tag<'static> {
        Tag::dict(header("max", &self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend + ?Sized> Module<B> for Softmax {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        Ok(backend.softmax(input)?.with_name(&self.name))
    }
}
