use deepbelief_core::{Buffer, Error, Result};

pub fn max_scalar(input: &Buffer, value: f32) -> Result<Buffer> {
    map(input, |v| v.max(value))
}

pub fn scale(input: &Buffer, factor: f32) -> Result<Buffer> {
    map(input, |v| v * factor)
}

/// Add `bias` to every run of `bias.len()` values along the last axis.
pub fn add_bias(input: &Buffer, bias: &Buffer) -> Result<Buffer> {
    let width = input.dims().last();
    if bias.element_count() != width {
        return Err(Error::ShapeMismatch {
            expected: width.into(),
            got: bias.dims().clone(),
        });
    }
    if width == 0 {
        return input.to_f32();
    }
    let bias = bias.to_f32_vec()?;
    let mut data = input.to_f32_vec()?;
    for row in data.chunks_exact_mut(width) {
        for (v, b) in row.iter_mut().zip(bias.iter()) {
            *v += b;
        }
    }
    Buffer::from_vec(data, input.dims().clone())
}

fn map(input: &Buffer, f: impl Fn(f32) -> f32) -> Result<Buffer> {
    let data = input.to_f32_vec()?.into_iter().map(f).collect();
    Buffer::from_vec(data, input.dims().clone())
}
