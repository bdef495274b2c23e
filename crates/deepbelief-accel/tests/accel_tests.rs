// Accelerated backend tests: every kernel is checked against the CPU reference

use deepbelief_accel::{pack, AccelBackend, AccelConfig};
use deepbelief_core::{Backend, Buffer, ErrorKind, Operand, PoolMode, Result};
use deepbelief_cpu::CpuBackend;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn assert_vec_approx(got: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(got.len(), expected.len(), "length mismatch: {} vs {}", got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!((g - e).abs() <= tol, "index {i}: got {g} expected {e} (tol {tol})");
    }
}

fn random(dims: &[usize], seed: u64) -> Buffer {
    let mut rng = StdRng::seed_from_u64(seed);
    Buffer::random(dims, -1.0, 1.0, &mut rng)
}

fn compare_gemm(backend: &AccelBackend, m: usize, k: usize, n: usize) -> Result<()> {
    let a = Operand::matrix(&random(&[m, k], 1))?;
    let b = Operand::matrix(&random(&[k, n], 2))?;
    let expected = CpuBackend.gemm(1.0, &a, &b, 0.0, None)?;
    let got = backend.gemm(1.0, &a, &b, 0.0, None)?;
    assert_eq!(got.dims(), expected.dims());
    assert_vec_approx(&got.to_f32_vec()?, &expected.to_f32_vec()?, 1e-4);
    Ok(())
}

// Readback encoding

#[test]
fn test_rgba8_readback_is_exact() -> Result<()> {
    let values = [0.0, -0.0, 1.5, -3.25e-7, f32::MAX, f32::MIN_POSITIVE];
    let bytes = pack::encode_rgba8(&values);
    assert_eq!(bytes.len(), values.len() * 4);
    let back = pack::decode_rgba8(&bytes)?;
    for (v, b) in values.iter().zip(back.iter()) {
        assert_eq!(v.to_bits(), b.to_bits());
    }
    assert!(pack::decode_rgba8(&[1, 2, 3]).is_err());
    Ok(())
}

// GEMM

#[test]
fn test_gemm_unpacked_matches_cpu() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_packed_layout(false));
    compare_gemm(&backend, 3, 5, 7)
}

#[test]
fn test_gemm_packed_matches_cpu() -> Result<()> {
    let backend = AccelBackend::default();
    compare_gemm(&backend, 8, 12, 5)
}

#[test]
fn test_gemm_odd_shapes_use_unpacked_layout() -> Result<()> {
    // m is not a multiple of four, so the packed layout cannot apply
    let backend = AccelBackend::default();
    compare_gemm(&backend, 6, 8, 3)
}

#[test]
fn test_gemm_tiles_long_reductions() -> Result<()> {
    let small = AccelConfig::default().with_max_texture_size(4);
    // unpacked: k = 10 runs as tiles of 4, 4 and 2
    compare_gemm(&AccelBackend::new(small.clone().with_packed_layout(false)), 3, 10, 4)?;
    // packed: tiles of 16 values
    let backend = AccelBackend::new(small);
    compare_gemm(&backend, 4, 40, 3)?;
    assert!(backend.substrate_stats().dispatches >= 3);
    Ok(())
}

#[test]
fn test_gemm_alpha_beta_across_tiles() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_max_texture_size(3));
    let a = Operand::matrix(&random(&[2, 7], 5))?;
    let b = Operand::matrix(&random(&[7, 3], 6))?;
    let c = random(&[2, 3], 7);
    let expected = CpuBackend.gemm(0.5, &a, &b, -2.0, Some(&c))?;
    let got = backend.gemm(0.5, &a, &b, -2.0, Some(&c))?;
    assert_vec_approx(&got.to_f32_vec()?, &expected.to_f32_vec()?, 1e-4);
    Ok(())
}

#[test]
fn test_gemm_transposed_quantized_weights() -> Result<()> {
    let backend = AccelBackend::default();
    let weights = random(&[4, 8], 11).quantize(8)?;
    let a = Operand::matrix(&random(&[4, 8], 12))?;
    let b = Operand::matrix(&weights)?.transposed();
    let expected = CpuBackend.gemm(1.0, &a, &b, 0.0, None)?;
    let got = backend.gemm(1.0, &a, &b, 0.0, None)?;
    assert_vec_approx(&got.to_f32_vec()?, &expected.to_f32_vec()?, 1e-4);
    Ok(())
}

#[test]
fn test_gemm_too_large_for_textures() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_max_texture_size(4));
    let a = Operand::matrix(&random(&[5, 2], 1))?;
    let b = Operand::matrix(&random(&[2, 2], 2))?;
    let err = backend.gemm(1.0, &a, &b, 0.0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(backend.live_textures(), 0);
    Ok(())
}

#[test]
fn test_gemm_shape_mismatch() {
    let backend = AccelBackend::default();
    let a = Operand::matrix(&random(&[2, 3], 1)).unwrap();
    let b = Operand::matrix(&random(&[2, 2], 2)).unwrap();
    let err = backend.gemm(1.0, &a, &b, 0.0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

// Texture cache

#[test]
fn test_weight_textures_are_cached_and_released() -> Result<()> {
    let backend = AccelBackend::default();
    let weights = random(&[8, 4], 3);
    let b = Operand::matrix(&weights)?;
    let a = Operand::matrix(&random(&[4, 8], 4))?;

    backend.gemm(1.0, &a, &b, 0.0, None)?;
    backend.gemm(1.0, &a, &b, 0.0, None)?;
    let stats = backend.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.cached_textures, 1);
    // only the cached weights outlive a call
    assert_eq!(backend.live_textures(), 1);

    assert_eq!(backend.release(&weights), 1);
    assert_eq!(backend.live_textures(), 0);
    Ok(())
}

#[test]
fn test_cache_evicts_after_write() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_float_readback(true));
    let weights = Buffer::from_slice(&[1.0, 0.0, 0.0, 1.0], (2, 2))?;
    let a = Operand::matrix(&Buffer::from_slice(&[2.0, 3.0], (1, 2))?)?;

    let first = backend.gemm(1.0, &a, &Operand::matrix(&weights)?, 0.0, None)?;
    assert_eq!(first.to_f32_vec()?, vec![2.0, 3.0]);

    weights.set_value_at(&[0, 0], 10.0)?;
    let second = backend.gemm(1.0, &a, &Operand::matrix(&weights)?, 0.0, None)?;
    assert_eq!(second.to_f32_vec()?, vec![20.0, 3.0]);
    assert_eq!(backend.cache_stats().evictions, 1);

    assert_eq!(backend.release_all(), 1);
    assert_eq!(backend.live_textures(), 0);
    Ok(())
}

#[test]
fn test_cache_drops_least_recently_used_weights() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_max_cached_textures(2));
    let a = Operand::matrix(&random(&[3, 4], 1))?;
    let weights: Vec<Buffer> = (0..3).map(|seed| random(&[4, 2], 10 + seed)).collect();
    let run = |w: &Buffer| -> Result<()> {
        let b = Operand::matrix(w)?;
        let expected = CpuBackend.gemm(1.0, &a, &b, 0.0, None)?;
        let got = backend.gemm(1.0, &a, &b, 0.0, None)?;
        assert_vec_approx(&got.to_f32_vec()?, &expected.to_f32_vec()?, 1e-4);
        Ok(())
    };

    run(&weights[0])?;
    run(&weights[1])?;
    run(&weights[0])?;
    // the third set pushes out the second, the first was used more recently
    run(&weights[2])?;
    let stats = backend.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 3, 1));
    assert_eq!(stats.cached_textures, 2);
    assert_eq!(backend.live_textures(), 2);

    run(&weights[0])?;
    assert_eq!(backend.cache_stats().hits, 2);
    assert_eq!(backend.release(&weights[1]), 0);
    assert_eq!(backend.release(&weights[2]), 1);
    Ok(())
}

#[test]
fn test_transient_weight_operands_stay_bounded() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_max_cached_textures(3));
    let a = Operand::matrix(&random(&[2, 5], 1))?;
    for seed in 0..10 {
        let transient = random(&[5, 3], 100 + seed);
        backend.gemm(1.0, &a, &Operand::matrix(&transient)?, 0.0, None)?;
    }
    assert_eq!(backend.cache_stats().cached_textures, 3);
    assert_eq!(backend.cache_stats().evictions, 7);
    assert_eq!(backend.live_textures(), 3);

    let config = AccelConfig::from_json_str(r#"{"max_cached_textures": 8}"#)?;
    assert_eq!(config.max_cached_textures, 8);
    assert!(AccelConfig::from_json_str(r#"{"max_cached_textures": 0}"#).is_err());
    Ok(())
}

#[test]
fn test_transient_textures_do_not_leak() -> Result<()> {
    let backend = AccelBackend::new(AccelConfig::default().with_max_texture_size(2));
    let input = random(&[1, 4, 4, 4], 9);
    backend.pool_patches(&input, PoolMode::Max, 2, 2)?;
    backend.max_scalar(&input, 0.0)?;
    compare_gemm(&backend, 2, 9, 2)?;
    backend.release_all();
    let stats = backend.substrate_stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.created, stats.deleted);
    Ok(())
}

// Pooling and scalar max

#[test]
fn test_pool_matches_cpu() -> Result<()> {
    let backend = AccelBackend::default();
    let input = random(&[2, 7, 6, 8], 21);
    for mode in [PoolMode::Max, PoolMode::Average] {
        let expected = CpuBackend.pool_patches(&input, mode, 3, 2)?;
        let got = backend.pool_patches(&input, mode, 3, 2)?;
        assert_eq!(got.dims(), expected.dims());
        assert_vec_approx(&got.to_f32_vec()?, &expected.to_f32_vec()?, 1e-5);
    }
    Ok(())
}

#[test]
fn test_pool_falls_back_for_odd_channels() -> Result<()> {
    let backend = AccelBackend::default();
    let input = random(&[1, 5, 5, 3], 22);
    let expected = CpuBackend.pool_patches(&input, PoolMode::Max, 2, 1)?;
    let got = backend.pool_patches(&input, PoolMode::Max, 2, 1)?;
    assert_eq!(got.to_f32_vec()?, expected.to_f32_vec()?);
    assert_eq!(backend.substrate_stats().dispatches, 0);
    Ok(())
}

#[test]
fn test_max_scalar_matches_cpu() -> Result<()> {
    let backend = AccelBackend::default();
    for dims in [&[3usize, 8][..], &[2, 5], &[7]] {
        let input = random(dims, 31);
        let expected = CpuBackend.max_scalar(&input, 0.0)?;
        let got = backend.max_scalar(&input, 0.0)?;
        assert_eq!(got.dims(), input.dims());
        assert_eq!(got.to_f32_vec()?, expected.to_f32_vec()?);
    }
    Ok(())
}

#[test]
fn test_host_kernels_delegate_to_cpu() -> Result<()> {
    let backend = AccelBackend::default();
    let input = random(&[2, 6], 41);
    assert_eq!(
        backend.softmax(&input)?.to_f32_vec()?,
        CpuBackend.softmax(&input)?.to_f32_vec()?
    );
    assert_eq!(backend.name(), "accel");
    Ok(())
}

proptest! {
    #[test]
    fn prop_gemm_matches_cpu(
        m in 1usize..9, k in 1usize..13, n in 1usize..6,
        max_texture_size in 2usize..6,
        packed in any::<bool>(),
    ) {
        let config = AccelConfig::default()
            .with_max_texture_size(max_texture_size.max(m).max(n))
            .with_packed_layout(packed);
        let backend = AccelBackend::new(config);
        let a = Operand::matrix(&random(&[m, k], m as u64)).unwrap();
        let b = Operand::matrix(&random(&[k, n], k as u64)).unwrap();
        let expected = CpuBackend.gemm(1.0, &a, &b, 0.0, None).unwrap().to_f32_vec().unwrap();
        let got = backend.gemm(1.0, &a, &b, 0.0, None).unwrap().to_f32_vec().unwrap();
        for (g, e) in got.iter().zip(expected.iter()) {
            prop_assert!((g - e).abs() < 1e-4);
        }
    }
}
