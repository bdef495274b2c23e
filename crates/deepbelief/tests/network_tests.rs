// Network tests: loading synthetic graphs, running them on both backends,
// classification, and saving

use deepbelief::format::buffer_to_tag;
use deepbelief::nn::{Conv, Flat, Layer, Neuron, Pool, Relu, Softmax};
use deepbelief::{
    top_predictions, AccelBackend, Backend, Buffer, CpuBackend, EngineConfig, ErrorKind, Network,
    PoolMode, Prediction, Result, Tag,
};
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

const LABELS: [&str; 3] = ["cat", "dog", "teapot"];
const RESCALED: usize = 8;
const CROP: usize = 6;

fn mean_image() -> Result<Buffer> {
    let values = (0..RESCALED * RESCALED * 3).map(|i| (i % 7) as f32 * 0.1).collect();
    Buffer::from_vec(values, [RESCALED, RESCALED, 3])
}

/// conv 3x3 -> relu -> relu -> max pool -> flat -> neuron -> softmax
///
/// A 6x6 crop leaves 3x3x4 = 36 values after the pool.
fn model_layers() -> Result<Vec<Layer>> {
    Ok(vec![
        Layer::Conv(Conv::new("conv1", random(&[27, 4], 1), Some(random(&[4], 2)), 3, 1, 1)?),
        Layer::Relu(Relu::new("relu1")),
        Layer::Relu(Relu::new("relu1b")),
        Layer::Pool(Pool::new("pool1", 2, 2, PoolMode::Max)),
        Layer::Flat(Flat::new("flat")),
        Layer::Neuron(Neuron::new("fc", random(&[36, 3], 3), Some(random(&[3], 4)), false)?),
        Layer::Softmax(Softmax::new("prob")),
    ])
}

fn graph_tag(layers: Vec<Tag<'static>>, labels: &[&str], input_size: Option<u32>) -> Result<Tag<'static>> {
    let mut entries = vec![
        ("data_mean", buffer_to_tag(&mean_image()?, 32)?),
        ("layers", Tag::List(layers)),
        ("label_names", Tag::List(labels.iter().map(|l| Tag::string(*l)).collect())),
        ("copyright", Tag::string("Synthetic test weights")),
    ];
    if let Some(size) = input_size {
        entries.push(("input_size", Tag::Uint(size)));
    }
    Ok(Tag::dict(entries))
}

fn model_bytes() -> Result<Vec<u8>> {
    let layers = model_layers()?
        .iter()
        .map(|l| l.to_tag(None))
        .collect::<Result<Vec<_>>>()?;
    Ok(graph_tag(layers, &LABELS, Some(RESCALED as u32))?.encode())
}

fn crop_config() -> EngineConfig {
    EngineConfig::default().with_image_size(CROP)
}

fn load<B: Backend>(bytes: &[u8], backend: B) -> Result<Network<B>> {
    Network::from_bytes_with_config(bytes, backend, crop_config())
}

fn test_image(height: usize, width: usize) -> Result<Buffer> {
    let values = (0..height * width * 3)
        .map(|i| ((i * 37) % 255) as f32 / 255.0)
        .collect();
    Buffer::from_vec(values, [height, width, 3])
}

// Loading

#[test]
fn test_load_reads_every_root_entry() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    // the second relu is dropped
    assert_eq!(network.layers().len(), 6);
    assert_eq!(network.labels(), &LABELS.map(String::from));
    assert_eq!(network.copyright(), Some("Synthetic test weights"));
    assert_eq!(network.source(), None);
    assert_eq!(network.data_mean().dims().sizes(), &[RESCALED, RESCALED, 3]);
    assert_eq!(network.num_parameters(), 27 * 4 + 4 + 36 * 3 + 3);
    assert!(network.describe().starts_with("Network with 6 layers, 3 labels"));
    Ok(())
}

#[test]
fn test_input_size_sets_the_rescaled_edge() -> Result<()> {
    let config = crop_config().with_rescaled_size(256);
    let network = Network::from_bytes_with_config(&model_bytes()?, CpuBackend, config)?;
    // the crop comes from the config, the rescale edge from the graph
    assert_eq!(network.config().image_size, CROP);
    assert_eq!(network.config().rescaled_size, RESCALED);
    assert_eq!(network.prepare().image_size(), CROP);
    assert_eq!(network.prepare().rescaled_size(), RESCALED);

    let batch = network.prepare().run(&test_image(20, 20)?)?;
    assert_eq!(batch.dims().sizes(), &[1, CROP, CROP, 3]);

    // the default 227 crop cannot fit in an 8 pixel rescale
    assert!(Network::from_bytes(&model_bytes()?, CpuBackend).is_err());
    Ok(())
}

#[test]
fn test_crop_must_fit_the_mean_without_input_size() -> Result<()> {
    let layers = model_layers()?
        .iter()
        .map(|l| l.to_tag(None))
        .collect::<Result<Vec<_>>>()?;
    let bytes = graph_tag(layers, &LABELS, None)?.encode();

    // default crop of 227 does not fit in the 8x8 mean
    assert!(Network::from_bytes(&bytes, CpuBackend).is_err());

    let config = EngineConfig::default().with_image_size(CROP);
    let network = Network::from_bytes_with_config(&bytes, CpuBackend, config)?;
    assert_eq!(network.prepare().image_size(), CROP);
    Ok(())
}

#[test]
fn test_unknown_layer_class_fails_the_load() -> Result<()> {
    let bad = Tag::dict([("class", Tag::string("lstm")), ("name", Tag::string("x"))]);
    let bytes = graph_tag(vec![bad], &LABELS, Some(RESCALED as u32))?.encode();
    let err = Network::from_bytes(&bytes, CpuBackend).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    Ok(())
}

#[test]
fn test_truncated_file_fails_the_load() -> Result<()> {
    let bytes = model_bytes()?;
    for cut in [0, 7, bytes.len() / 2, bytes.len() - 1] {
        let err = Network::from_bytes(&bytes[..cut], CpuBackend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode, "cut at {cut}");
    }
    Ok(())
}

#[test]
fn test_missing_labels_fail_the_load() -> Result<()> {
    let root = Tag::dict([
        ("data_mean", buffer_to_tag(&mean_image()?, 32)?),
        ("layers", Tag::List(vec![])),
    ]);
    let err = Network::from_bytes(&root.encode(), CpuBackend).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    Ok(())
}

#[test]
fn test_non_string_label_is_a_decode_error() -> Result<()> {
    let mut root = graph_tag(vec![], &[], Some(RESCALED as u32))?;
    if let Tag::Dict(entries) = &mut root {
        entries.push(("label_names".into(), Tag::List(vec![Tag::Uint(3)])));
    }
    let err = Network::from_bytes(&root.encode(), CpuBackend).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    Ok(())
}

// Running

#[test]
fn test_run_produces_class_probabilities() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    let input = random(&[2, CROP, CROP, 3], 9);
    let output = network.run(&input)?;
    assert_eq!(output.dims().sizes(), &[2, 3]);
    let values = output.to_f32_vec()?;
    for row in values.chunks(3) {
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(row.iter().all(|&p| p > 0.0));
    }
    Ok(())
}

#[test]
fn test_run_partial_stops_early() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    let input = random(&[1, CROP, CROP, 3], 9);

    let conv = network.run_partial(&input, 1)?;
    assert_eq!(conv.dims().sizes(), &[1, CROP, CROP, 4]);
    let pooled = network.run_partial(&input, 3)?;
    assert_eq!(pooled.dims().sizes(), &[1, 3, 3, 4]);
    assert!(pooled.to_f32_vec()?.iter().all(|&v| v >= 0.0));

    let nothing = network.run_partial(&input, 0)?;
    assert_eq!(nothing.to_f32_vec()?, input.to_f32_vec()?);

    let everything = network.run_partial(&input, 100)?;
    assert_eq!(everything.to_f32_vec()?, network.run(&input)?.to_f32_vec()?);
    Ok(())
}

#[test]
fn test_accel_backend_matches_cpu() -> Result<()> {
    let bytes = model_bytes()?;
    let cpu = load(&bytes, CpuBackend)?;
    let accel = load(&bytes, AccelBackend::default())?;
    let input = random(&[3, CROP, CROP, 3], 11);
    assert_vec_approx(
        &accel.run(&input)?.to_f32_vec()?,
        &cpu.run(&input)?.to_f32_vec()?,
        1e-4,
    );
    // weights stay resident between passes
    accel.run(&input)?;
    assert!(accel.backend().cache_stats().hits > 0);
    Ok(())
}

// Classification

#[test]
fn test_classify_pairs_scores_with_labels() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    let image = test_image(12, 10)?;
    let predictions = network.classify(&image)?;
    assert_eq!(predictions.len(), 3);
    for (prediction, label) in predictions.iter().zip(LABELS) {
        assert_eq!(prediction.label, label);
    }
    let total: f32 = predictions.iter().map(|p| p.score).sum();
    assert!((total - 1.0).abs() < 1e-5);

    let expected = network.run(&network.prepare().run(&image)?)?.to_f32_vec()?;
    let scores: Vec<f32> = predictions.iter().map(|p| p.score).collect();
    assert_vec_approx(&scores, &expected, 1e-6);
    Ok(())
}

#[test]
fn test_multi_sample_averages_ten_crops() -> Result<()> {
    let config = crop_config().with_multi_sample(true);
    let network = Network::from_bytes_with_config(&model_bytes()?, CpuBackend, config)?;
    let image = test_image(RESCALED, RESCALED)?;

    let batch = network.prepare().run(&image)?;
    assert_eq!(batch.dims().sizes(), &[10, CROP, CROP, 3]);
    let rows = network.run(&batch)?.to_f32_vec()?;
    let mut expected = [0.0f32; 3];
    for row in rows.chunks(3) {
        for (e, v) in expected.iter_mut().zip(row) {
            *e += v / 10.0;
        }
    }

    let scores: Vec<f32> = network.classify(&image)?.iter().map(|p| p.score).collect();
    assert_vec_approx(&scores, &expected, 1e-5);
    Ok(())
}

#[test]
fn test_label_count_must_match_outputs() -> Result<()> {
    let layers = model_layers()?
        .iter()
        .map(|l| l.to_tag(None))
        .collect::<Result<Vec<_>>>()?;
    let bytes = graph_tag(layers, &["cat", "dog"], Some(RESCALED as u32))?.encode();
    let network = load(&bytes, CpuBackend)?;
    let err = network.classify(&test_image(8, 8)?).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    Ok(())
}

#[test]
fn test_top_predictions_orders_by_score() {
    let predictions: Vec<Prediction> = [("a", 0.2), ("b", 0.5), ("c", 0.3)]
        .iter()
        .map(|&(label, score)| Prediction {
            label: label.to_string(),
            score,
        })
        .collect();
    let top = top_predictions(&predictions, 2);
    assert_eq!(top.len(), 2);
    assert_eq!((top[0].label.as_str(), top[1].label.as_str()), ("b", "c"));
    assert_eq!(top_predictions(&predictions, 10).len(), 3);
}

// Saving

#[test]
fn test_saved_graph_reloads_identically() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    let reloaded = load(&network.to_bytes()?, CpuBackend)?;

    assert_eq!(reloaded.describe(), network.describe());
    assert_eq!(reloaded.labels(), network.labels());
    assert_eq!(reloaded.copyright(), network.copyright());
    assert_eq!(reloaded.prepare().image_size(), CROP);
    assert_eq!(reloaded.prepare().rescaled_size(), RESCALED);

    let image = test_image(9, 9)?;
    let a: Vec<f32> = network.classify(&image)?.iter().map(|p| p.score).collect();
    let b: Vec<f32> = reloaded.classify(&image)?.iter().map(|p| p.score).collect();
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn test_saved_graph_requantizes_weights() -> Result<()> {
    let network = load(&model_bytes()?, CpuBackend)?;
    let small = network.to_bytes_with_bits(8)?;
    assert!(small.len() < network.to_bytes()?.len());

    let reloaded = load(&small, CpuBackend)?;
    let Layer::Conv(conv) = &reloaded.layers()[0] else {
        panic!("expected a conv layer first");
    };
    assert_eq!(conv.kernels().precision()?.bits(), 8);

    let input = random(&[1, CROP, CROP, 3], 5);
    assert_vec_approx(
        &reloaded.run(&input)?.to_f32_vec()?,
        &network.run(&input)?.to_f32_vec()?,
        0.1,
    );
    Ok(())
}
