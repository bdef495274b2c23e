use deepbelief_core::matrix::check_gemm_shapes;
use deepbelief_core::{Buffer, Operand, Result};

/// Reference `alpha * A * B + beta * C` as a direct triple loop.
///
/// Operands are read through their strides, and quantized elements are
/// expanded one at a time inside the accumulation. When `beta` is zero the
/// previous contents of `c` are not read.
pub fn gemm(alpha: f32, a: &Operand, b: &Operand, beta: f32, c: Option<&Buffer>) -> Result<Buffer> {
    let (m, k, n) = check_gemm_shapes(a, b, c)?;

    let mut out = match c {
        Some(c) if beta != 0.0 => {
            let mut values = c.to_f32_vec()?;
            for v in values.iter_mut() {
                *v *= beta;
            }
            values
        }
        _ => vec![0.0f32; m * n],
    };

    let a_storage = a.buffer().storage()?;
    let b_storage = b.buffer().storage()?;
    for i in 0..m {
        for j in 0..n {
            let mut total = 0.0f32;
            for l in 0..k {
                total += a_storage.value(a.index(i, l)) * b_storage.value(b.index(l, j));
            }
            out[i * n + j] += alpha * total;
        }
    }
    Buffer::from_vec(out, (m, n))
}
