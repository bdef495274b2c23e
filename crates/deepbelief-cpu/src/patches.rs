// Patch extraction ("im2col") and margin padding
//
// A convolution becomes a single GEMM once every receptive field has been
// copied out into its own row:
//
//   input   (N, H, W, C)
//   patches (N, outH * outW, K * K * C)   row = [ky][kx][c]
//
// Positions are counted with ceil, so a final patch that hangs over the
// right or bottom edge is still produced; the part outside the image reads
// as zero.

use deepbelief_core::{bail, Buffer, Result};

/// Patch positions along one axis: `ceil((size - kernel) / stride) + 1`.
pub fn conv_output_size(size: usize, kernel: usize, stride: usize) -> Result<usize> {
    if kernel == 0 || stride == 0 {
        bail!("kernel size and stride must be positive (got {kernel} and {stride})");
    }
    if kernel > size {
        bail!("kernel size {kernel} exceeds input size {size}");
    }
    Ok((size - kernel).div_ceil(stride) + 1)
}

pub fn patches_into_rows(input: &Buffer, kernel: usize, stride: usize) -> Result<Buffer> {
    let (count, height, width, channels) = input.dims().as_image()?;
    let out_h = conv_output_size(height, kernel, stride)?;
    let out_w = conv_output_size(width, kernel, stride)?;
    let row_len = kernel * kernel * channels;
    let data = input.to_f32_vec()?;

    let mut out = vec![0.0f32; count * out_h * out_w * row_len];
    for image in 0..count {
        for py in 0..out_h {
            for px in 0..out_w {
                let row_start = ((image * out_h + py) * out_w + px) * row_len;
                for ky in 0..kernel {
                    let y = py * stride + ky;
                    if y >= height {
                        break;
                    }
                    for kx in 0..kernel {
                        let x = px * stride + kx;
                        if x >= width {
                            break;
                        }
                        let src = ((image * height + y) * width + x) * channels;
                        let dst = row_start + (ky * kernel + kx) * channels;
                        out[dst..dst + channels].copy_from_slice(&data[src..src + channels]);
                    }
                }
            }
        }
    }
    Buffer::from_vec(out, [count, out_h * out_w, row_len])
}

/// Pad height and width by `margin` on every side.
pub fn insert_margin(input: &Buffer, margin: usize, value: f32) -> Result<Buffer> {
    let (count, height, width, channels) = input.dims().as_image()?;
    if margin == 0 {
        return input.to_f32();
    }
    let out_h = height + 2 * margin;
    let out_w = width + 2 * margin;
    let data = input.to_f32_vec()?;
    let row_len = width * channels;

    let mut out = vec![value; count * out_h * out_w * channels];
    for image in 0..count {
        for y in 0..height {
            let src = (image * height + y) * row_len;
            let dst = ((image * out_h + y + margin) * out_w + margin) * channels;
            out[dst..dst + row_len].copy_from_slice(&data[src..src + row_len]);
        }
    }
    Ok(Buffer::from_vec(out, [count, out_h, out_w, channels])?.with_name(input.name()))
}
