// Substrate — a data-parallel texture machine
//
// The accelerated kernels are written against the model shared by GPU
// shading APIs:
//
//   - data lives in 2-D textures of 1 or 4 float channels per texel
//   - a texture may carry a (scale, offset) pair applied on every fetch, which
//     is how quantized codes are expanded inside a program
//   - a dispatch runs one program per texel of an output texture, every
//     invocation independent of the others
//   - results come back to the host through an explicit readback
//
// Textures are created and deleted explicitly. `TextureHandle` deletes its
// texture when dropped, so a kernel that bails out halfway never leaks.
// Invocations of a dispatch are spread over the rayon thread pool; a dispatch
// returns only when every texel is written.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use deepbelief_core::{Error, Result};
use rayon::prelude::*;
use tracing::trace;

use crate::config::AccelConfig;
use crate::pack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

/// Size and channel count of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureShape {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl TextureShape {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        TextureShape {
            width,
            height,
            channels,
        }
    }

    pub fn texel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn value_count(&self) -> usize {
        self.texel_count() * self.channels
    }
}

impl fmt::Display for TextureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Texture contents, laid out row by row with channels innermost.
#[derive(Debug, Clone)]
pub struct TextureData {
    shape: TextureShape,
    values: Vec<f32>,
    scale: f32,
    offset: f32,
}

impl TextureData {
    pub fn shape(&self) -> TextureShape {
        self.shape
    }

    /// Channel `channel` of texel (x, y), with the fetch transform applied.
    #[inline]
    pub fn fetch(&self, x: usize, y: usize, channel: usize) -> f32 {
        let index = (y * self.shape.width + x) * self.shape.channels + channel;
        self.values[index] * self.scale + self.offset
    }
}

/// Counters describing substrate activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubstrateStats {
    pub created: u64,
    pub deleted: u64,
    pub dispatches: u64,
    pub live: usize,
}

pub struct Substrate {
    max_texture_size: usize,
    float_readback: bool,
    textures: Mutex<HashMap<TextureId, Arc<TextureData>>>,
    next_id: AtomicU64,
    created: AtomicU64,
    deleted: AtomicU64,
    dispatches: AtomicU64,
}

impl Substrate {
    pub fn new(config: &AccelConfig) -> Self {
        Substrate {
            max_texture_size: config.max_texture_size,
            float_readback: config.float_readback,
            textures: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            created: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn max_texture_size(&self) -> usize {
        self.max_texture_size
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TextureId, Arc<TextureData>>>> {
        self.textures
            .lock()
            .map_err(|_| Error::Substrate("texture registry lock poisoned".to_string()))
    }

    fn check_shape(&self, shape: TextureShape) -> Result<()> {
        if shape.width == 0 || shape.height == 0 {
            return Err(Error::Substrate(format!("empty texture {shape}")));
        }
        if shape.width > self.max_texture_size || shape.height > self.max_texture_size {
            return Err(Error::Substrate(format!(
                "texture {shape} exceeds the maximum edge of {}",
                self.max_texture_size
            )));
        }
        if shape.channels != 1 && shape.channels != 4 {
            return Err(Error::Substrate(format!(
                "textures hold 1 or 4 channels, not {}",
                shape.channels
            )));
        }
        Ok(())
    }

    /// Upload a texture. `values` is row-major with channels innermost.
    pub fn create_texture(
        self: &Arc<Self>,
        shape: TextureShape,
        values: Vec<f32>,
        scale: f32,
        offset: f32,
    ) -> Result<TextureHandle> {
        self.check_shape(shape)?;
        if values.len() != shape.value_count() {
            return Err(Error::Substrate(format!(
                "texture {shape} needs {} values, got {}",
                shape.value_count(),
                values.len()
            )));
        }
        let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let data = TextureData {
            shape,
            values,
            scale,
            offset,
        };
        self.registry()?.insert(id, Arc::new(data));
        self.created.fetch_add(1, Ordering::Relaxed);
        trace!(texture = id.0, %shape, "create texture");
        Ok(TextureHandle {
            substrate: Arc::clone(self),
            id,
            shape,
        })
    }

    /// A zero-filled render target.
    pub fn create_target(self: &Arc<Self>, shape: TextureShape) -> Result<TextureHandle> {
        self.create_texture(shape, vec![0.0; shape.value_count()], 1.0, 0.0)
    }

    fn delete_texture(&self, id: TextureId) {
        let removed = match self.textures.lock() {
            Ok(mut map) => map.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&id).is_some(),
        };
        if removed {
            self.deleted.fetch_add(1, Ordering::Relaxed);
            trace!(texture = id.0, "delete texture");
        }
    }

    /// Shared snapshot of a texture for reading inside a program.
    pub fn fetch(&self, id: TextureId) -> Result<Arc<TextureData>> {
        self.registry()?
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Substrate(format!("texture {} does not exist", id.0)))
    }

    /// Run `program` once per texel of `target`, writing its channels.
    pub fn dispatch<F>(&self, target: &TextureHandle, program: F) -> Result<()>
    where
        F: Fn(usize, usize) -> [f32; 4] + Sync + Send,
    {
        let shape = target.shape;
        let channels = shape.channels;
        let mut values = vec![0.0f32; shape.value_count()];
        values
            .par_chunks_mut(shape.width * channels)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.chunks_exact_mut(channels).enumerate() {
                    let result = program(x, y);
                    texel.copy_from_slice(&result[..channels]);
                }
            });
        let mut registry = self.registry()?;
        let slot = registry
            .get_mut(&target.id)
            .ok_or_else(|| Error::Substrate(format!("render target {} is gone", target.id.0)))?;
        *slot = Arc::new(TextureData {
            shape,
            values,
            scale: 1.0,
            offset: 0.0,
        });
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Copy a texture back to the host, row-major with channels innermost.
    pub fn read_pixels(&self, texture: &TextureHandle) -> Result<Vec<f32>> {
        let data = self.fetch(texture.id)?;
        let values: Vec<f32> = (0..data.values.len())
            .map(|i| data.values[i] * data.scale + data.offset)
            .collect();
        if self.float_readback {
            return Ok(values);
        }
        pack::decode_rgba8(&pack::encode_rgba8(&values))
    }

    pub fn live_textures(&self) -> usize {
        match self.textures.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn stats(&self) -> SubstrateStats {
        SubstrateStats {
            created: self.created.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            live: self.live_textures(),
        }
    }
}

impl fmt::Debug for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substrate")
            .field("max_texture_size", &self.max_texture_size)
            .field("float_readback", &self.float_readback)
            .field("live", &self.live_textures())
            .finish()
    }
}

/// Owning reference to a texture; deletes it on drop.
pub struct TextureHandle {
    substrate: Arc<Substrate>,
    id: TextureId,
    shape: TextureShape,
}

impl TextureHandle {
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn shape(&self) -> TextureShape {
        self.shape
    }

    pub fn data(&self) -> Result<Arc<TextureData>> {
        self.substrate.fetch(self.id)
    }
}

impl fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TextureHandle({}, {})", self.id.0, self.shape)
    }
}

impl Drop for TextureHandle {
    fn drop(&mut self) {
        self.substrate.delete_texture(self.id);
    }
}
