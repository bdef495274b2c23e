use deepbelief_core::{bail, Buffer, Error, Result};

/// Copy of channels `[start, start + count)` of the innermost axis.
pub fn extract_channels(input: &Buffer, start: usize, count: usize) -> Result<Buffer> {
    let dims = input.dims();
    let channels = dims.last();
    if dims.rank() == 0 || count == 0 || start + count > channels {
        bail!(
            "channel range {start}..{} outside {} channels of '{}'",
            start + count,
            channels,
            input.name()
        );
    }
    let data = input.to_f32_vec()?;
    let out: Vec<f32> = data
        .chunks_exact(channels)
        .flat_map(|pixel| pixel[start..start + count].iter().copied())
        .collect();
    let out_dims = dims.with_size(dims.rank() - 1, count)?;
    Buffer::from_vec(out, out_dims)
}

/// Concatenate buffers along the innermost axis, in order.
///
/// Every input must agree on all other dimensions.
pub fn join_channels(inputs: &[Buffer]) -> Result<Buffer> {
    let Some(first) = inputs.first() else {
        bail!("join_channels needs at least one input");
    };
    let rank = first.dims().rank();
    if rank == 0 || first.dims().last() == 0 {
        bail!("join_channels needs inputs with a channel axis");
    }
    let pixels = first.element_count() / first.dims().last();
    let mut total_channels = 0usize;
    let mut parts = Vec::with_capacity(inputs.len());
    for input in inputs {
        let dims = input.dims();
        let same_outer = dims.rank() == rank
            && dims.sizes()[..rank - 1] == first.dims().sizes()[..rank - 1];
        if !same_outer {
            return Err(Error::ShapeMismatch {
                expected: first.dims().with_size(rank - 1, dims.last())?,
                got: dims.clone(),
            });
        }
        total_channels += dims.last();
        parts.push((dims.last(), input.to_f32_vec()?));
    }

    let mut out = Vec::with_capacity(pixels * total_channels);
    for pixel in 0..pixels {
        for (channels, data) in &parts {
            out.extend_from_slice(&data[pixel * channels..(pixel + 1) * channels]);
        }
    }
    Buffer::from_vec(out, first.dims().with_size(rank - 1, total_channels)?)
}
