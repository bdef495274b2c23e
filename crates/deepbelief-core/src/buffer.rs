use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::Rng;

use crate::dims::Dimensions;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::precision::{Precision, QuantParams};

// Buffer — N-dimensional numeric data, full precision or quantized
//
// MEMORY MODEL:
//
//   A Buffer is a handle: an id, a layout and a reference-counted pointer to
//   the storage. Views (view, view_at_top_index, extract_subregion, reshaped)
//   build a new handle over the same storage with a different layout, so a
//   write through a view lands in the parent's data and the storage lives as
//   long as any handle to it.
//
//   Every write bumps a generation counter on the shared storage. Device-side
//   mirrors compare it to notice stale copies.

/// Unique identity of a buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        BufferId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Flat element storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    Q16 { codes: Vec<u16>, params: QuantParams },
    Q8 { codes: Vec<u8>, params: QuantParams },
}

impl Storage {
    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::Q16 { codes, .. } => codes.len(),
            Storage::Q8 { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn precision(&self) -> Precision {
        match self {
            Storage::F32(_) => Precision::F32,
            Storage::Q16 { .. } => Precision::Q16,
            Storage::Q8 { .. } => Precision::Q8,
        }
    }

    pub fn quant_params(&self) -> Option<QuantParams> {
        match self {
            Storage::F32(_) => None,
            Storage::Q16 { params, .. } | Storage::Q8 { params, .. } => Some(*params),
        }
    }

    /// Element at a storage index, dequantized.
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        match self {
            Storage::F32(v) => v[index],
            Storage::Q16 { codes, params } => params.dequantize(codes[index] as u32),
            Storage::Q8 { codes, params } => params.dequantize(codes[index] as u32),
        }
    }

    /// Element at a storage index as stored: the code itself when quantized.
    #[inline]
    pub fn raw(&self, index: usize) -> f32 {
        match self {
            Storage::F32(v) => v[index],
            Storage::Q16 { codes, .. } => codes[index] as f32,
            Storage::Q8 { codes, .. } => codes[index] as f32,
        }
    }

    /// `(scale, offset)` turning a raw element into its value.
    pub fn raw_transform(&self) -> (f32, f32) {
        match self.quant_params() {
            Some(params) => (params.spread(), params.min),
            None => (1.0, 0.0),
        }
    }
}

struct Shared {
    data: RwLock<Storage>,
    generation: AtomicU64,
}

/// An N-dimensional buffer of (possibly quantized) values.
#[derive(Clone)]
pub struct Buffer {
    id: BufferId,
    shared: Arc<Shared>,
    layout: Layout,
    name: String,
}

impl Buffer {
    /// Wrap storage with a contiguous layout of the given dims.
    pub fn from_storage(storage: Storage, dims: impl Into<Dimensions>) -> Result<Buffer> {
        let dims = dims.into();
        if storage.len() != dims.element_count() {
            return Err(Error::ReshapeElementMismatch {
                src: storage.len(),
                dst: dims.element_count(),
                dst_dims: dims,
            });
        }
        Ok(Self::dense(storage, dims))
    }

    pub fn from_vec(data: Vec<f32>, dims: impl Into<Dimensions>) -> Result<Buffer> {
        Self::from_storage(Storage::F32(data), dims)
    }

    pub fn from_slice(data: &[f32], dims: impl Into<Dimensions>) -> Result<Buffer> {
        Self::from_vec(data.to_vec(), dims)
    }

    pub fn zeros(dims: impl Into<Dimensions>) -> Buffer {
        let dims = dims.into();
        let data = vec![0.0; dims.element_count()];
        Self::dense(Storage::F32(data), dims)
    }

    fn dense(storage: Storage, dims: Dimensions) -> Buffer {
        Buffer {
            id: BufferId::new(),
            shared: Arc::new(Shared {
                data: RwLock::new(storage),
                generation: AtomicU64::new(0),
            }),
            layout: Layout::contiguous(dims),
            name: "None".to_string(),
        }
    }

    pub fn from_u8_codes(
        codes: Vec<u8>,
        dims: impl Into<Dimensions>,
        min: f32,
        max: f32,
    ) -> Result<Buffer> {
        let params = QuantParams::new(min, max, 8)?;
        Self::from_storage(Storage::Q8 { codes, params }, dims)
    }

    pub fn from_u16_codes(
        codes: Vec<u16>,
        dims: impl Into<Dimensions>,
        min: f32,
        max: f32,
    ) -> Result<Buffer> {
        let params = QuantParams::new(min, max, 16)?;
        Self::from_storage(Storage::Q16 { codes, params }, dims)
    }

    /// Uniformly distributed values in `[min, max)`.
    pub fn random<R: Rng + ?Sized>(
        dims: impl Into<Dimensions>,
        min: f32,
        max: f32,
        rng: &mut R,
    ) -> Buffer {
        let dims = dims.into();
        let data = (0..dims.element_count())
            .map(|_| min + (max - min) * rng.gen::<f32>())
            .collect::<Vec<_>>();
        Self::dense(Storage::F32(data), dims)
    }

    // Accessors

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn dims(&self) -> &Dimensions {
        self.layout.dims()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn element_count(&self) -> usize {
        self.layout.element_count()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Write counter of the shared storage.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Whether two handles alias the same storage.
    pub fn shares_storage_with(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn storage(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.shared
            .data
            .read()
            .map_err(|_| Error::msg("buffer storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, Storage>> {
        let guard = self
            .shared
            .data
            .write()
            .map_err(|_| Error::msg("buffer storage lock poisoned"))?;
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        Ok(guard)
    }

    pub fn precision(&self) -> Result<Precision> {
        Ok(self.storage()?.precision())
    }

    pub fn quant_params(&self) -> Result<Option<QuantParams>> {
        Ok(self.storage()?.quant_params())
    }

    // Views

    fn with_layout(&self, layout: Layout) -> Buffer {
        Buffer {
            id: BufferId::new(),
            shared: Arc::clone(&self.shared),
            layout,
            name: self.name.clone(),
        }
    }

    /// New handle over the same storage and layout.
    pub fn view(&self) -> Buffer {
        self.with_layout(self.layout.clone())
    }

    /// View of item `index` along the outermost axis, with that axis removed.
    pub fn view_at_top_index(&self, index: usize) -> Result<Buffer> {
        Ok(self.with_layout(self.layout.select_top(index)?))
    }

    /// Strided view of the region starting at `origin` with the given dims.
    pub fn extract_subregion(
        &self,
        origin: &[usize],
        dims: impl Into<Dimensions>,
    ) -> Result<Buffer> {
        Ok(self.with_layout(self.layout.subregion(origin, &dims.into())?))
    }

    pub fn can_reshape_to(&self, dims: &Dimensions) -> bool {
        dims.element_count() == self.element_count() && self.layout.is_compact()
    }

    /// Reinterpret the dims in place; no data moves.
    pub fn reshape(&mut self, dims: impl Into<Dimensions>) -> Result<()> {
        self.layout = self.layout.reshape(dims.into())?;
        Ok(())
    }

    /// A view with different dims over the same elements.
    pub fn reshaped(&self, dims: impl Into<Dimensions>) -> Result<Buffer> {
        Ok(self.with_layout(self.layout.reshape(dims.into())?))
    }

    // Element access

    /// Dequantized value at an index tuple.
    pub fn value_at(&self, indices: &[usize]) -> Result<f32> {
        let index = self.layout.storage_index(indices)?;
        Ok(self.storage()?.value(index))
    }

    pub fn set_value_at(&self, indices: &[usize], value: f32) -> Result<()> {
        let index = self.layout.storage_index(indices)?;
        match &mut *self.write_storage()? {
            Storage::F32(data) => {
                data[index] = value;
                Ok(())
            }
            other => Err(Error::msg(format!(
                "cannot write into {} buffer '{}'",
                other.precision(),
                self.name
            ))),
        }
    }

    /// All values in logical row-major order, dequantized.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let storage = self.storage()?;
        if let Storage::F32(data) = &*storage {
            if self.layout.is_compact() {
                let start = self.layout.offset();
                return Ok(data[start..start + self.element_count()].to_vec());
            }
        }
        Ok(self
            .layout
            .storage_indices()
            .map(|i| storage.value(i))
            .collect())
    }

    /// Dense full-precision copy with the same dims and name.
    pub fn to_f32(&self) -> Result<Buffer> {
        Ok(Buffer::from_vec(self.to_f32_vec()?, self.dims().clone())?.with_name(&self.name))
    }

    /// Overwrite this buffer's elements with another buffer's, in order.
    pub fn copy_data_from(&self, other: &Buffer) -> Result<()> {
        if other.element_count() != self.element_count() {
            return Err(Error::ShapeMismatch {
                expected: self.dims().clone(),
                got: other.dims().clone(),
            });
        }
        let values = other.to_f32_vec()?;
        match &mut *self.write_storage()? {
            Storage::F32(data) => {
                for (index, value) in self.layout.storage_indices().zip(values) {
                    data[index] = value;
                }
                Ok(())
            }
            other => Err(Error::msg(format!(
                "cannot write into {} buffer '{}'",
                other.precision(),
                self.name
            ))),
        }
    }

    /// Reorder (C, H, W) or (N, C, H, W) data into channels-last order.
    pub fn from_channel_major(&self) -> Result<Buffer> {
        let (n, c, h, w) = match self.dims().sizes() {
            &[c, h, w] => (None, c, h, w),
            &[n, c, h, w] => (Some(n), c, h, w),
            _ => {
                return Err(Error::RankMismatch {
                    expected: 4,
                    got: self.dims().rank(),
                })
            }
        };
        let input = self.to_f32_vec()?;
        let items = n.unwrap_or(1);
        let plane = h * w;
        let mut output = vec![0.0f32; input.len()];
        for item in 0..items {
            let base = item * c * plane;
            for channel in 0..c {
                for pixel in 0..plane {
                    output[base + pixel * c + channel] = input[base + channel * plane + pixel];
                }
            }
        }
        let dims = match n {
            Some(n) => Dimensions::from([n, h, w, c]),
            None => Dimensions::from([h, w, c]),
        };
        Ok(Buffer::from_vec(output, dims)?.with_name(&self.name))
    }

    // Quantization

    /// Quantized copy whose range is taken from the data.
    ///
    /// `bits == 32` yields a dense full-precision copy.
    pub fn quantize(&self, bits: u32) -> Result<Buffer> {
        let values = self.to_f32_vec()?;
        if bits == 32 {
            return Ok(Buffer::from_vec(values, self.dims().clone())?.with_name(&self.name));
        }
        let (min, max) = value_range(&values);
        let params = QuantParams::new(min, max, bits)?;
        let storage = match bits {
            8 => Storage::Q8 {
                codes: values.iter().map(|&v| params.quantize(v) as u8).collect(),
                params,
            },
            _ => Storage::Q16 {
                codes: values.iter().map(|&v| params.quantize(v) as u16).collect(),
                params,
            },
        };
        Ok(Buffer::from_storage(storage, self.dims().clone())?.with_name(&self.name))
    }

    /// Same dims and every pair of values within `tolerance`.
    pub fn are_all_close(&self, other: &Buffer, tolerance: f32) -> Result<bool> {
        if self.dims() != other.dims() {
            return Ok(false);
        }
        let a = self.to_f32_vec()?;
        let b = other.to_f32_vec()?;
        Ok(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance))
    }
}

/// Smallest and largest value; `(0, 0)` for empty input.
pub fn value_range(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layout", &self.layout)
            .finish()
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(storage) = self.storage() else {
            return write!(f, "Buffer {} - {} (unreadable)", self.name, self.dims());
        };
        let (min, max) = match storage.quant_params() {
            Some(params) => (params.min, params.max),
            None => {
                let values: Vec<f32> = self
                    .layout
                    .storage_indices()
                    .map(|i| storage.value(i))
                    .collect();
                value_range(&values)
            }
        };
        write!(
            f,
            "Buffer {} - {}, {} bits per element, range ({}-{})",
            self.name,
            self.dims(),
            storage.precision().bits(),
            min,
            max
        )
    }
}
