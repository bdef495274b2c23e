// Local response normalization
//
//   out[c] = in[c] * (k + alpha / N * sum(in[c']^2 for c' in window(c)))^-beta
//
// The window is N channels centred on c and clipped at the channel bounds.
// Walking the channels of a pixel in order, the window sum is kept as a
// running total: add the square entering on the right, read, then drop the
// square leaving on the left.

use deepbelief_core::{bail, Buffer, ResponseParams, Result};

pub fn local_response(input: &Buffer, params: ResponseParams) -> Result<Buffer> {
    if params.window == 0 {
        bail!("normalization window must be positive");
    }
    let channels = input.dims().last();
    if channels == 0 {
        return input.to_f32();
    }
    let data = input.to_f32_vec()?;
    let half = params.window / 2;
    let scale = params.alpha / params.window as f32;

    let mut out = Vec::with_capacity(data.len());
    let mut terms = vec![0.0f32; channels];
    for pixel in data.chunks_exact(channels) {
        for (term, &v) in terms.iter_mut().zip(pixel) {
            *term = v * v * scale;
        }
        let mut sum: f32 = terms[..half.min(channels)].iter().sum();
        for (c, &v) in pixel.iter().enumerate() {
            if c + half < channels {
                sum += terms[c + half];
            }
            let magnitude = sum + params.k;
            let value = v * magnitude.powf(-params.beta);
            out.push(if value.is_nan() { 0.0 } else { value });
            if c >= half {
                sum -= terms[c - half];
            }
        }
    }
    Buffer::from_vec(out, input.dims().clone())
}
