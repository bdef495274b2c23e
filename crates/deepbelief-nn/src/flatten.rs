// Flat — collapse every non-batch dimension into one
//
//   [N, H, W, C] -> [N, H * W * C]
//
// The output is a view sharing the input's storage. A strided input is
// compacted first, since a view can only be reshaped when it is compact.

use deepbelief_core::{Backend, Buffer, Result, Tag};

use crate::layer::{batch_size, header};
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Flat {
    name: String,
}

impl Flat {
    pub fn new(name: impl Into<String>) -> Self {
        Flat { name: name.into() }
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        Ok(Flat::new(tag.require_str("name")?))
    }

    pub fn to_tag(&self) -> Tag<'static> {
        Tag::dict(header("flat", &self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend + ?Sized> Module<B> for Flat {
    fn forward(&self, _backend: &B, input: &Buffer) -> Result<Buffer> {
        let count = batch_size(input)?;
        let flat = (count, input.element_count() / count);
        let output = if input.layout().is_compact() {
            input.reshaped(flat)?
        } else {
            input.to_f32()?.reshaped(flat)?
        };
        Ok(output.with_name(&self.name))
    }
}
