// Substrate kernels
//
// Each kernel uploads its operands as textures, dispatches one program over
// an output texture, and reads the result back into a row-major buffer.
//
// GEMM layouts, for C (m x n) = A (m x k) * B (k x n):
//
//   A texture:  height m, one row of A per texture row
//   B texture:  height n, one column of B per texture row (B is transposed
//               on upload so both operands are walked along k)
//   output:     width n, height m
//
// In the packed layout (m and k multiples of four) every texel holds four
// consecutive k values, and each output texel holds four consecutive rows of
// C in its channels. A reduction longer than one texture row is split into
// tiles of `max_texture_size` texels; each tile is a separate pass that adds
// onto the previous pass's output.

use std::sync::Arc;

use deepbelief_core::matrix::check_gemm_shapes;
use deepbelief_core::{Buffer, Error, Operand, PoolMode, Result};
use deepbelief_cpu as cpu;
use tracing::trace;

use crate::cache::{CacheKey, TextureCache};
use crate::config::AccelConfig;
use crate::substrate::{Substrate, TextureHandle, TextureShape};

/// Raw values of `operand` for reduction indices `l0..l1`, one texture row
/// per output row, along with the fetch transform. `transposed` walks the
/// reduction down the operand's rows instead of along them.
fn gather_tile(
    operand: &Operand,
    rows: usize,
    l0: usize,
    l1: usize,
    transposed: bool,
) -> Result<(Vec<f32>, f32, f32)> {
    let storage = operand.buffer().storage()?;
    let tile_len = l1 - l0;
    let mut values = Vec::with_capacity(rows * tile_len);
    for i in 0..rows {
        for l in l0..l1 {
            let index = if transposed {
                operand.index(l, i)
            } else {
                operand.index(i, l)
            };
            values.push(storage.raw(index));
        }
    }
    let (scale, offset) = storage.raw_transform();
    Ok((values, scale, offset))
}

/// C in output texture layout.
fn output_layout(c: &[f32], m: usize, n: usize, packed: bool) -> Vec<f32> {
    if !packed {
        return c.to_vec();
    }
    let mut values = vec![0.0; m * n];
    for y in 0..m / 4 {
        for x in 0..n {
            for j in 0..4 {
                values[(y * n + x) * 4 + j] = c[(y * 4 + j) * n + x];
            }
        }
    }
    values
}

/// Row-major C from the output texture layout.
fn row_major(values: &[f32], m: usize, n: usize, packed: bool) -> Vec<f32> {
    if !packed {
        return values.to_vec();
    }
    let mut out = vec![0.0; m * n];
    for y in 0..m / 4 {
        for x in 0..n {
            for j in 0..4 {
                out[(y * 4 + j) * n + x] = values[(y * n + x) * 4 + j];
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub fn gemm(
    substrate: &Arc<Substrate>,
    cache: &TextureCache,
    config: &AccelConfig,
    alpha: f32,
    a: &Operand,
    b: &Operand,
    beta: f32,
    c: Option<&Buffer>,
) -> Result<Buffer> {
    let (m, k, n) = check_gemm_shapes(a, b, c)?;
    if k == 0 {
        return cpu::gemm::gemm(alpha, a, b, beta, c);
    }
    let max = substrate.max_texture_size();
    if m > max || n > max {
        return Err(Error::Substrate(format!(
            "gemm output {m}x{n} does not fit in {max}x{max} textures"
        )));
    }
    let packed = config.packed_layout && m % 4 == 0 && k % 4 == 0;
    let channels = if packed { 4 } else { 1 };
    let tile_k = max * channels;
    let out_shape = if packed {
        TextureShape::new(n, m / 4, 4)
    } else {
        TextureShape::new(n, m, 1)
    };
    trace!(m, k, n, packed, tiles = k.div_ceil(tile_k), "accel gemm");

    let mut previous: Option<TextureHandle> = match c {
        Some(c) if beta != 0.0 => Some(substrate.create_texture(
            out_shape,
            output_layout(&c.to_f32_vec()?, m, n, packed),
            1.0,
            0.0,
        )?),
        _ => None,
    };
    let mut pass_beta = beta;

    let b_key = |l0: usize| CacheKey {
        buffer: b.buffer().id(),
        tile: l0,
        packed,
        strides: (b.row_stride(), b.col_stride(), b.offset()),
    };
    let b_generation = b.buffer().generation();

    for l0 in (0..k).step_by(tile_k) {
        let l1 = (l0 + tile_k).min(k);
        let width = (l1 - l0) / channels;

        let (a_values, a_scale, a_offset) = gather_tile(a, m, l0, l1, false)?;
        let a_tex = substrate.create_texture(
            TextureShape::new(width, m, channels),
            a_values,
            a_scale,
            a_offset,
        )?;
        let b_shape = TextureShape::new(width, n, channels);
        let b_tex = cache.get_or_upload(b_key(l0), b_shape, b_generation, || {
            let (values, scale, offset) = gather_tile(b, n, l0, l1, true)?;
            substrate.create_texture(b_shape, values, scale, offset)
        })?;

        let target = substrate.create_target(out_shape)?;
        let a_data = a_tex.data()?;
        let b_data = b_tex.data()?;
        let prev_data = match &previous {
            Some(p) => Some(p.data()?),
            None => None,
        };
        let beta_here = pass_beta;
        substrate.dispatch(&target, |x, y| {
            let mut out = [0.0f32; 4];
            if packed {
                for (j, slot) in out.iter_mut().enumerate() {
                    let row = y * 4 + j;
                    let mut sum = 0.0f32;
                    for t in 0..width {
                        for ch in 0..4 {
                            sum += a_data.fetch(t, row, ch) * b_data.fetch(t, x, ch);
                        }
                    }
                    let carried = prev_data.as_ref().map_or(0.0, |p| p.fetch(x, y, j));
                    *slot = alpha * sum + beta_here * carried;
                }
            } else {
                let mut sum = 0.0f32;
                for t in 0..width {
                    sum += a_data.fetch(t, y, 0) * b_data.fetch(t, x, 0);
                }
                let carried = prev_data.as_ref().map_or(0.0, |p| p.fetch(x, y, 0));
                out[0] = alpha * sum + beta_here * carried;
            }
            out
        })?;

        previous = Some(target);
        pass_beta = 1.0;
    }

    let result = previous.ok_or_else(|| Error::Substrate("gemm produced no output".to_string()))?;
    let values = substrate.read_pixels(&result)?;
    Buffer::from_vec(row_major(&values, m, n, packed), [m, n])
}

/// Pooling over channels-last images, four channels per texel.
pub fn pool_patches(
    substrate: &Arc<Substrate>,
    input: &Buffer,
    mode: PoolMode,
    size: usize,
    stride: usize,
) -> Result<Buffer> {
    let (count, height, width, channels) = input.dims().as_image()?;
    let out_h = cpu::pool_output_size(height, size, stride)?;
    let out_w = cpu::pool_output_size(width, size, stride)?;
    let groups = channels / 4;
    let max = substrate.max_texture_size();
    let fits = channels % 4 == 0
        && width * groups <= max
        && count * height <= max;
    if !fits {
        trace!(mode = mode.name(), channels, "pool falls back to cpu");
        return cpu::pool::pool_patches(input, mode, size, stride);
    }

    let source = substrate.create_texture(
        TextureShape::new(width * groups, count * height, 4),
        input.to_f32_vec()?,
        1.0,
        0.0,
    )?;
    let target = substrate.create_target(TextureShape::new(out_w * groups, count * out_h, 4))?;
    let data = source.data()?;
    let window_len = (size * size) as f32;
    substrate.dispatch(&target, |x, y| {
        let (ox, group) = (x / groups, x % groups);
        let (image, oy) = (y / out_h, y % out_h);
        let mut acc = match mode {
            PoolMode::Max => [f32::MIN; 4],
            PoolMode::Average => [0.0; 4],
        };
        for py in 0..size {
            let iy = (oy * stride + py).min(height - 1);
            for px in 0..size {
                let ix = (ox * stride + px).min(width - 1);
                for (j, slot) in acc.iter_mut().enumerate() {
                    let v = data.fetch(ix * groups + group, image * height + iy, j);
                    *slot = match mode {
                        PoolMode::Max => slot.max(v),
                        PoolMode::Average => *slot + v,
                    };
                }
            }
        }
        if mode == PoolMode::Average {
            for slot in acc.iter_mut() {
                *slot /= window_len;
            }
        }
        acc
    })?;
    let values = substrate.read_pixels(&target)?;
    Buffer::from_vec(values, [count, out_h, out_w, channels])
}

pub fn max_scalar(substrate: &Arc<Substrate>, input: &Buffer, value: f32) -> Result<Buffer> {
    let last = input.dims().last();
    let channels = if last % 4 == 0 { 4 } else { 1 };
    let width = last / channels;
    let height = input.element_count() / last.max(1);
    let max = substrate.max_texture_size();
    if width == 0 || width > max || height > max {
        return cpu::elementwise::max_scalar(input, value);
    }

    let source = substrate.create_texture(
        TextureShape::new(width, height, channels),
        input.to_f32_vec()?,
        1.0,
        0.0,
    )?;
    let target = substrate.create_target(source.shape())?;
    let data = source.data()?;
    substrate.dispatch(&target, |x, y| {
        let mut out = [0.0f32; 4];
        for (j, slot) in out.iter_mut().enumerate().take(channels) {
            *slot = data.fetch(x, y, j).max(value);
        }
        out
    })?;
    let values = substrate.read_pixels(&target)?;
    Buffer::from_vec(values, input.dims().clone())
}
