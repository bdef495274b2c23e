use deepbelief_core::{Buffer, Result};

/// Row-wise softmax, shifted by the row maximum before exponentiating.
pub fn softmax(input: &Buffer) -> Result<Buffer> {
    let (rows, cols) = input.dims().as_matrix()?;
    if cols == 0 {
        return input.to_f32();
    }
    let mut data = input.to_f32_vec()?;
    for row in data.chunks_exact_mut(cols) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            total += *v;
        }
        for v in row.iter_mut() {
            *v /= total;
        }
    }
    Buffer::from_vec(data, (rows, cols))
}
