// Reference kernel tests for the CPU backend

use deepbelief_core::{Backend, Buffer, Dimensions, ErrorKind, Operand, PoolMode, ResponseParams, Result};
use deepbelief_cpu::{conv_output_size, pool_output_size, CpuBackend};
use proptest::prelude::*;

fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len(), "length mismatch: {} vs {}", got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(approx_eq(*g, *e, tol), "index {i}: got {g} expected {e} (tol {tol})");
    }
}

fn matrix(values: &[f32], rows: usize, cols: usize) -> Result<Operand> {
    Operand::matrix(&Buffer::from_slice(values, (rows, cols))?)
}

// GEMM

#[test]
fn test_gemm_two_by_two() -> Result<()> {
    let a = matrix(&[1.0, 2.0, 3.0, 4.0], 2, 2)?;
    let b = matrix(&[5.0, 6.0, 7.0, 8.0], 2, 2)?;
    let c = CpuBackend.gemm(1.0, &a, &b, 0.0, None)?;
    assert_eq!(c.dims(), &Dimensions::from((2, 2)));
    assert_eq!(c.to_f32_vec()?, vec![19.0, 22.0, 43.0, 50.0]);
    Ok(())
}

#[test]
fn test_gemm_alpha_beta() -> Result<()> {
    let a = matrix(&[1.0, 2.0, 3.0, 4.0], 2, 2)?;
    let b = matrix(&[5.0, 6.0, 7.0, 8.0], 2, 2)?;
    let c0 = Buffer::from_slice(&[1.0, 1.0, 1.0, 1.0], (2, 2))?;
    let c = CpuBackend.gemm(0.5, &a, &b, 2.0, Some(&c0))?;
    assert_vec_approx(&c.to_f32_vec()?, &[11.5, 13.0, 23.5, 27.0], 1e-6);
    // the input C is left untouched
    assert_eq!(c0.to_f32_vec()?, vec![1.0; 4]);
    Ok(())
}

#[test]
fn test_gemm_rectangular_with_transposed_operand() -> Result<()> {
    // A is 2x3, B is stored as its 2x3 transpose and read through strides
    let a = matrix(&[1.0, 0.0, 2.0, -1.0, 3.0, 1.0], 2, 3)?;
    let b_t = matrix(&[3.0, 2.0, 1.0, 1.0, 1.0, 0.0], 2, 3)?.transposed();
    assert_eq!((b_t.rows(), b_t.cols()), (3, 2));
    let c = CpuBackend.gemm(1.0, &a, &b_t, 0.0, None)?;
    // [1 0 2; -1 3 1] x [3 1; 2 1; 1 0]
    assert_eq!(c.to_f32_vec()?, vec![5.0, 1.0, 4.0, 2.0]);
    Ok(())
}

#[test]
fn test_gemm_dequantizes_operands() -> Result<()> {
    // codes 0, 64, 128, 192 over [0, 4) with spread 1/64 give 0, 1, 2, 3
    let q = Buffer::from_u8_codes(vec![0, 64, 128, 192], (2, 2), 0.0, 4.0)?;
    let a = matrix(&[1.0, 1.0], 1, 2)?;
    let c = CpuBackend.gemm(1.0, &a, &Operand::matrix(&q)?, 0.0, None)?;
    assert_vec_approx(&c.to_f32_vec()?, &[2.0, 4.0], 1e-6);
    Ok(())
}

#[test]
fn test_gemm_shape_mismatch() -> Result<()> {
    let a = matrix(&[1.0; 6], 2, 3)?;
    let b = matrix(&[1.0; 4], 2, 2)?;
    let err = CpuBackend.gemm(1.0, &a, &b, 0.0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    let b = matrix(&[1.0; 6], 3, 2)?;
    let wrong_c = Buffer::zeros((3, 3));
    assert!(CpuBackend.gemm(1.0, &a, &b, 1.0, Some(&wrong_c)).is_err());
    Ok(())
}

// Patches and margins

#[test]
fn test_output_size_rules() -> Result<()> {
    // conv counts partial patches, pool does not
    assert_eq!(conv_output_size(5, 2, 2)?, 3);
    assert_eq!(pool_output_size(5, 2, 2)?, 2);
    assert_eq!(conv_output_size(227, 11, 4)?, 55);
    assert_eq!(pool_output_size(55, 3, 2)?, 27);
    assert!(conv_output_size(2, 3, 1).is_err());
    Ok(())
}

#[test]
fn test_patches_into_rows_layout() -> Result<()> {
    // 1x3x3x1 image, 2x2 kernel at stride 1
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], [1, 3, 3, 1])?;
    let rows = CpuBackend.patches_into_rows(&input, 2, 1)?;
    assert_eq!(rows.dims(), &Dimensions::from([1, 4, 4]));
    assert_eq!(
        rows.to_f32_vec()?,
        vec![1.0, 2.0, 4.0, 5.0, 2.0, 3.0, 5.0, 6.0, 4.0, 5.0, 7.0, 8.0, 5.0, 6.0, 8.0, 9.0]
    );
    Ok(())
}

#[test]
fn test_partial_patches_read_zero() -> Result<()> {
    // 1x3x3x1 image, 2x2 kernel at stride 2: the second patch in each
    // direction hangs over the edge
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], [1, 3, 3, 1])?;
    let rows = CpuBackend.patches_into_rows(&input, 2, 2)?;
    assert_eq!(rows.dims(), &Dimensions::from([1, 4, 4]));
    let v = rows.to_f32_vec()?;
    assert_eq!(&v[4..8], &[3.0, 0.0, 6.0, 0.0]);
    assert_eq!(&v[12..16], &[9.0, 0.0, 0.0, 0.0]);
    Ok(())
}

#[test]
fn test_patches_keep_channels_together() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 10.0, 2.0, 20.0], [1, 1, 2, 2])?;
    let rows = CpuBackend.patches_into_rows(&input, 1, 1)?;
    assert_eq!(rows.dims(), &Dimensions::from([1, 2, 2]));
    assert_eq!(rows.to_f32_vec()?, vec![1.0, 10.0, 2.0, 20.0]);
    Ok(())
}

#[test]
fn test_insert_margin() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0], [1, 2, 2, 1])?;
    let padded = CpuBackend.insert_margin(&input, 1, 0.0)?;
    assert_eq!(padded.dims(), &Dimensions::from([1, 4, 4, 1]));
    let v = padded.to_f32_vec()?;
    assert_eq!(&v[0..4], &[0.0; 4]);
    assert_eq!(&v[4..8], &[0.0, 1.0, 2.0, 0.0]);
    assert_eq!(&v[8..12], &[0.0, 3.0, 4.0, 0.0]);
    assert_eq!(v.iter().sum::<f32>(), 10.0);
    Ok(())
}

// Channels

#[test]
fn test_extract_and_join_channels() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], [1, 1, 2, 4])?;
    let low = CpuBackend.extract_channels(&input, 0, 2)?;
    let high = CpuBackend.extract_channels(&input, 2, 2)?;
    assert_eq!(low.to_f32_vec()?, vec![1.0, 2.0, 5.0, 6.0]);
    assert_eq!(high.to_f32_vec()?, vec![3.0, 4.0, 7.0, 8.0]);
    let joined = CpuBackend.join_channels(&[low, high])?;
    assert!(joined.are_all_close(&input, 0.0)?);
    assert!(CpuBackend.extract_channels(&input, 3, 2).is_err());
    Ok(())
}

#[test]
fn test_join_channels_rejects_mismatched_pixels() {
    let a = Buffer::zeros([1, 2, 2, 3]);
    let b = Buffer::zeros([1, 2, 3, 3]);
    assert!(CpuBackend.join_channels(&[a, b]).is_err());
}

#[test]
fn test_join_channels_rejects_zero_channels() {
    let err = CpuBackend.join_channels(&[Buffer::zeros([1, 2, 2, 0])]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

// Pooling

#[test]
fn test_max_pool_two_by_two() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0], [1, 2, 2, 1])?;
    let out = CpuBackend.pool_patches(&input, PoolMode::Max, 2, 2)?;
    assert_eq!(out.dims(), &Dimensions::from([1, 1, 1, 1]));
    assert_eq!(out.to_f32_vec()?, vec![4.0]);
    Ok(())
}

#[test]
fn test_max_pool_per_channel_overlapping() -> Result<()> {
    // 3x3 with two channels, 2x2 windows at stride 1
    let mut data = Vec::new();
    for i in 0..9 {
        data.push(i as f32);
        data.push(-(i as f32));
    }
    let input = Buffer::from_vec(data, [1, 3, 3, 2])?;
    let out = CpuBackend.pool_patches(&input, PoolMode::Max, 2, 1)?;
    assert_eq!(out.dims(), &Dimensions::from([1, 2, 2, 2]));
    assert_eq!(
        out.to_f32_vec()?,
        vec![4.0, 0.0, 5.0, -1.0, 7.0, -3.0, 8.0, -4.0]
    );
    Ok(())
}

#[test]
fn test_average_pool() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 6.0], [1, 2, 2, 1])?;
    let out = CpuBackend.pool_patches(&input, PoolMode::Average, 2, 2)?;
    assert_eq!(out.to_f32_vec()?, vec![3.0]);
    Ok(())
}

// Local response normalization

fn brute_force_response(values: &[f32], params: ResponseParams) -> Vec<f32> {
    let half = (params.window / 2) as isize;
    let n = values.len() as isize;
    (0..n)
        .map(|c| {
            let lo = (c - half).max(0);
            let hi = (c + half).min(n - 1);
            let sum: f32 = (lo..=hi).map(|i| values[i as usize].powi(2)).sum();
            let magnitude = params.k + params.alpha / params.window as f32 * sum;
            values[c as usize] * magnitude.powf(-params.beta)
        })
        .collect()
}

#[test]
fn test_local_response_matches_window_sum() -> Result<()> {
    let values = [1.0, -2.0, 3.0, 0.5, 4.0, -1.5, 2.0];
    let params = ResponseParams {
        window: 5,
        k: 2.0,
        alpha: 1e-1,
        beta: 0.75,
    };
    let input = Buffer::from_slice(&values, [1, 1, 1, 7])?;
    let out = CpuBackend.local_response(&input, params)?;
    assert_vec_approx(&out.to_f32_vec()?, &brute_force_response(&values, params), 1e-5);
    Ok(())
}

#[test]
fn test_local_response_window_one_has_no_neighbours() -> Result<()> {
    let values = [3.0, 100.0, -2.0];
    let params = ResponseParams {
        window: 1,
        k: 1.0,
        alpha: 0.5,
        beta: 0.5,
    };
    let input = Buffer::from_slice(&values, [1, 1, 1, 3])?;
    let out = CpuBackend.local_response(&input, params)?.to_f32_vec()?;
    let expected: Vec<f32> = values
        .iter()
        .map(|v| v * (1.0 + 0.5 * v * v).powf(-0.5))
        .collect();
    assert_vec_approx(&out, &expected, 1e-5);
    Ok(())
}

#[test]
fn test_local_response_without_alpha_is_pure_scaling() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 1, 2, 3])?;
    let params = ResponseParams {
        window: 3,
        k: 4.0,
        alpha: 0.0,
        beta: 0.5,
    };
    let out = CpuBackend.local_response(&input, params)?;
    assert_vec_approx(&out.to_f32_vec()?, &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0], 1e-6);
    Ok(())
}

#[test]
fn test_local_response_nan_becomes_zero() -> Result<()> {
    // k + 0 = -1 raised to a fractional power is NaN
    let input = Buffer::from_slice(&[0.0, 1.0], [1, 1, 1, 2])?;
    let params = ResponseParams {
        window: 1,
        k: -1.0,
        alpha: 0.0,
        beta: 0.5,
    };
    let out = CpuBackend.local_response(&input, params)?;
    assert_eq!(out.to_f32_vec()?, vec![0.0, 0.0]);
    Ok(())
}

// Softmax and elementwise

#[test]
fn test_softmax_known_values() -> Result<()> {
    let input = Buffer::from_slice(&[0.0, 0.0, 1000.0, 1000.0], (2, 2))?;
    let out = CpuBackend.softmax(&input)?;
    assert_vec_approx(&out.to_f32_vec()?, &[0.5, 0.5, 0.5, 0.5], 1e-6);
    Ok(())
}

proptest! {
    #[test]
    fn prop_softmax_rows_sum_to_one_and_ignore_shift(
        row in prop::collection::vec(-20.0f32..20.0, 1..12),
        shift in -50.0f32..50.0,
    ) {
        let cols = row.len();
        let input = Buffer::from_vec(row.clone(), (1, cols)).unwrap();
        let shifted = Buffer::from_vec(row.iter().map(|v| v + shift).collect(), (1, cols)).unwrap();
        let a = CpuBackend.softmax(&input).unwrap().to_f32_vec().unwrap();
        let b = CpuBackend.softmax(&shifted).unwrap().to_f32_vec().unwrap();
        let total: f32 = a.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-5);
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn prop_gemm_matches_definition(
        m in 1usize..5, k in 1usize..6, n in 1usize..5,
        seed in prop::collection::vec(-3.0f32..3.0, 64),
        alpha in -2.0f32..2.0, beta in -2.0f32..2.0,
    ) {
        let a: Vec<f32> = (0..m * k).map(|i| seed[i % 64]).collect();
        let b: Vec<f32> = (0..k * n).map(|i| seed[(i * 7 + 3) % 64]).collect();
        let c0: Vec<f32> = (0..m * n).map(|i| seed[(i * 5 + 11) % 64]).collect();
        let c = CpuBackend.gemm(
            alpha,
            &Operand::matrix(&Buffer::from_vec(a.clone(), (m, k)).unwrap()).unwrap(),
            &Operand::matrix(&Buffer::from_vec(b.clone(), (k, n)).unwrap()).unwrap(),
            beta,
            Some(&Buffer::from_vec(c0.clone(), (m, n)).unwrap()),
        ).unwrap().to_f32_vec().unwrap();
        for i in 0..m {
            for j in 0..n {
                let dot: f32 = (0..k).map(|l| a[i * k + l] * b[l * n + j]).sum();
                let expected = beta * c0[i * n + j] + alpha * dot;
                prop_assert!((c[i * n + j] - expected).abs() < 1e-3);
            }
        }
    }
}

#[test]
fn test_max_scalar_is_relu_at_zero() -> Result<()> {
    let input = Buffer::from_slice(&[-1.0, 0.5, -0.0, 2.0], [4])?;
    let out = CpuBackend.max_scalar(&input, 0.0)?;
    assert_eq!(out.to_f32_vec()?, vec![0.0, 0.5, 0.0, 2.0]);
    Ok(())
}

#[test]
fn test_add_bias_and_scale() -> Result<()> {
    let input = Buffer::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3))?;
    let bias = Buffer::from_slice(&[10.0, 20.0, 30.0], [3])?;
    let out = CpuBackend.add_bias(&input, &bias)?;
    assert_eq!(out.to_f32_vec()?, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    let scaled = CpuBackend.scale(&out, 0.5)?;
    assert_eq!(scaled.to_f32_vec()?, vec![5.5, 11.0, 16.5, 7.0, 12.5, 18.0]);
    assert!(CpuBackend.add_bias(&input, &Buffer::zeros([2])).is_err());
    Ok(())
}
