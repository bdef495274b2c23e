// Pool — spatial down-sampling over K x K windows
//
// OUTPUT SIZE FORMULA:
//
//   H_out = floor((H - K) / S) + 1
//
// Unlike Conv, windows never hang over the edge: sample coordinates are
// clamped to the last valid row and column.

use deepbelief_core::{Backend, Buffer, Error, PoolMode, Result, Tag};

use crate::layer::header;
use crate::module::Module;

#[derive(Debug, Clone)]
pub struct Pool {
    name: String,
    size: usize,
    stride: usize,
    mode: PoolMode,
}

impl Pool {
    pub fn new(name: impl Into<String>, size: usize, stride: usize, mode: PoolMode) -> Self {
        Pool {
            name: name.into(),
            size,
            stride,
            mode,
        }
    }

    pub fn from_tag(tag: &Tag<'_>) -> Result<Self> {
        let mode_name = tag.require_str("mode")?;
        let mode = PoolMode::parse(mode_name).ok_or_else(|| {
            Error::malformed(0, format!("unknown pooling mode '{mode_name}'"))
        })?;
        Ok(Pool::new(
            tag.require_str("name")?,
            tag.require_usize("psize")?,
            tag.require_usize("stride")?,
            mode,
        ))
    }

    pub fn to_tag(&self) -> Tag<'static> {
        let mut entries = header("pool", &self.name);
        entries.push(("psize", Tag::Uint(self.size as u32)));
        entries.push(("stride", Tag::Uint(self.stride as u32)));
        entries.push(("mode", Tag::string(self.mode.name())));
        Tag::dict(entries)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn describe(&self) -> String {
        format!(
            "size={}, stride={}, mode={}",
            self.size,
            self.stride,
            self.mode.name()
        )
    }
}

impl<B: Backend + ?Sized> Module<B> for Pool {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        Ok(backend
            .pool_patches(input, self.mode, self.size, self.stride)?
            .with_name(&self.name))
    }
}
