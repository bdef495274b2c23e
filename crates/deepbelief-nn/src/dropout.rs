// Dropout — identity at inference time
//
// Dropout only acts during training. A loaded network keeps the layer so the
// graph serializes back unchanged, but forward() hands back a view of its
// input.

use deepbelief_core::{Backend, Buffer, Result, Tag};

use crate::layer::header;
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Dropout {
    name: String,
}

impl Dropout {
    pub fn new(name: impl Into<String>) -> Self {
        Dropout { name: name.into() }
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        Ok(Dropout::new(tag.require_str("name")?))
    }

    pub fn to_tag(&self) -> Tag<'static> {
        Tag::dict(header("dropout", &self.name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<B: Backend + ?Sized> Module<B> for Dropout {
    fn forward(&self, _backend: &B, input: &Buffer) -> Result<Buffer> {
        Ok(input.view())
    }
}
