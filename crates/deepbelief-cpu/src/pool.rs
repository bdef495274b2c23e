use deepbelief_core::{bail, Buffer, PoolMode, Result};

/// Window positions along one axis: `floor((size - window) / stride) + 1`.
pub fn pool_output_size(size: usize, window: usize, stride: usize) -> Result<usize> {
    if window == 0 || stride == 0 {
        bail!("pool size and stride must be positive (got {window} and {stride})");
    }
    if window > size {
        bail!("pool size {window} exceeds input size {size}");
    }
    Ok((size - window) / stride + 1)
}

pub fn pool_patches(input: &Buffer, mode: PoolMode, size: usize, stride: usize) -> Result<Buffer> {
    let (count, height, width, channels) = input.dims().as_image()?;
    let out_h = pool_output_size(height, size, stride)?;
    let out_w = pool_output_size(width, size, stride)?;
    let data = input.to_f32_vec()?;
    let window_len = (size * size) as f32;

    let mut out = Vec::with_capacity(count * out_h * out_w * channels);
    for image in 0..count {
        for oy in 0..out_h {
            for ox in 0..out_w {
                for channel in 0..channels {
                    let mut acc = match mode {
                        PoolMode::Max => f32::MIN,
                        PoolMode::Average => 0.0,
                    };
                    for py in 0..size {
                        let y = (oy * stride + py).min(height - 1);
                        for px in 0..size {
                            let x = (ox * stride + px).min(width - 1);
                            let v = data[((image * height + y) * width + x) * channels + channel];
                            acc = match mode {
                                PoolMode::Max => acc.max(v),
                                PoolMode::Average => acc + v,
                            };
                        }
                    }
                    out.push(match mode {
                        PoolMode::Max => acc,
                        PoolMode::Average => acc / window_len,
                    });
                }
            }
        }
    }
    Buffer::from_vec(out, [count, out_h, out_w, channels])
}
