// Classify Synthetic — build, save, reload and run a small network
//
// Builds a random-weight network in the graph file format, writes it out,
// loads it back on the reference and accelerated backends, and classifies
// one synthetic image on each.
//
// Architecture:
//   conv(3x3, 8 kernels, pad 1) → relu → max pool(2, 2)
//   → normalize(5) → flat → neuron(5) → softmax
//
// Usage:
//   cargo run -p classify-synthetic-example
//   cargo run -p classify-synthetic-example -- --multi-sample
//   cargo run -p classify-synthetic-example -- --bits 8 --save tiny.ntwk
//   cargo run -p classify-synthetic-example -- --model jetpac.ntwk
//   RUST_LOG=deepbelief_nn=debug cargo run -p classify-synthetic-example

use std::time::Instant;

use deepbelief::format::buffer_to_tag;
use deepbelief::nn::{Conv, Flat, Neuron, Normalize, Pool, Relu, Softmax};
use deepbelief::prelude::*;
use deepbelief::{PoolMode, ResponseParams, Tag};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LABELS: [&str; 5] = ["circle", "square", "triangle", "star", "blank"];
const RESCALED: usize = 32;
const CROP: usize = 28;

// Configuration

struct Config {
    model_path: Option<String>,
    save_path: Option<String>,
    bits: Option<u32>,
    multi_sample: bool,
    random_sample: bool,
    top: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: None,
            save_path: None,
            bits: None,
            multi_sample: false,
            random_sample: false,
            top: 3,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);
    let value = |flag: &str, v: Option<String>| v.ok_or_else(|| Error::msg(format!("{flag} needs a value")));
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" => cfg.model_path = Some(value("--model", args.next())?),
            "--save" => cfg.save_path = Some(value("--save", args.next())?),
            "--bits" => {
                let bits = value("--bits", args.next())?;
                cfg.bits = Some(bits.parse().map_err(|_| Error::msg(format!("invalid --bits {bits}")))?);
            }
            "--top" => {
                let top = value("--top", args.next())?;
                cfg.top = top.parse().map_err(|_| Error::msg(format!("invalid --top {top}")))?;
            }
            "--multi-sample" => cfg.multi_sample = true,
            "--random-sample" => cfg.random_sample = true,
            "--help" | "-h" => {
                println!("Classify a synthetic image with a deepbelief network");
                println!();
                println!("Options:");
                println!("  --model <path>     Load a graph file instead of building one");
                println!("  --save <path>      Write the graph that was run");
                println!("  --bits <8|16|32>   Weight depth used when saving");
                println!("  --multi-sample     Average ten crops per image");
                println!("  --random-sample    Take one crop at a random offset");
                println!("  --top <n>          Predictions to print (default: 3)");
                std::process::exit(0);
            }
            other => return Err(Error::msg(format!("unknown argument: {other}"))),
        }
    }
    Ok(cfg)
}

// Synthetic model

fn build_graph(rng: &mut StdRng) -> Result<Tag<'static>> {
    let pooled = CROP / 2;
    let layers = [
        Layer::Conv(Conv::new(
            "conv1",
            Buffer::random([27, 8], -0.5, 0.5, rng),
            Some(Buffer::random([8], -0.1, 0.1, rng)),
            3,
            1,
            1,
        )?),
        Layer::Relu(Relu::new("relu1")),
        Layer::Pool(Pool::new("pool1", 2, 2, PoolMode::Max)),
        Layer::Normalize(Normalize::new(
            "norm1",
            ResponseParams {
                window: 5,
                k: 1.0,
                alpha: 1e-4,
                beta: 0.75,
            },
        )?),
        Layer::Flat(Flat::new("flat")),
        Layer::Neuron(
            Neuron::new(
                "fc",
                Buffer::random([pooled * pooled * 8, LABELS.len()], -0.05, 0.05, rng),
                Some(Buffer::zeros([LABELS.len()])),
                false,
            )?
            .with_dropout(0.5),
        ),
        Layer::Softmax(Softmax::new("prob")),
    ];
    let layers = layers
        .iter()
        .map(|l| l.to_tag(None))
        .collect::<Result<Vec<_>>>()?;

    let mean = Buffer::random([RESCALED, RESCALED, 3], 0.4, 0.6, rng);
    Ok(Tag::dict([
        ("data_mean", buffer_to_tag(&mean, 32)?),
        ("layers", Tag::List(layers)),
        (
            "label_names",
            Tag::List(LABELS.iter().map(|l| Tag::string(*l)).collect()),
        ),
        ("input_size", Tag::Uint(RESCALED as u32)),
        ("copyright", Tag::string("Synthetic weights, no rights reserved")),
    ]))
}

/// A bright disc on a dark background.
fn synthetic_image(edge: usize) -> Result<Buffer> {
    let centre = edge as f32 / 2.0;
    let radius = edge as f32 / 3.0;
    let mut values = Vec::with_capacity(edge * edge * 3);
    for y in 0..edge {
        for x in 0..edge {
            let (dx, dy) = (x as f32 - centre, y as f32 - centre);
            let v = if dx * dx + dy * dy < radius * radius { 0.9 } else { 0.1 };
            values.extend([v, v * 0.8, v * 0.6]);
        }
    }
    Buffer::from_vec(values, [edge, edge, 3])
}

fn classify<B: Backend>(network: &Network<B>, image: &Buffer, top: usize) -> Result<()> {
    let start = Instant::now();
    let predictions = network.classify(image)?;
    let elapsed = start.elapsed();
    println!(
        "[{}] {} crops in {:.2?}",
        network.backend().name(),
        network.prepare().sample_count(),
        elapsed
    );
    for p in top_predictions(&predictions, top) {
        println!("  {:>8.4}  {}", p.score, p.label);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cfg = parse_args()?;

    let bytes = match &cfg.model_path {
        Some(path) => std::fs::read(path).map_err(|e| Error::msg(format!("{path}: {e}")))?,
        None => {
            let mut rng = StdRng::seed_from_u64(42);
            build_graph(&mut rng)?.encode()
        }
    };
    info!(bytes = bytes.len(), "graph ready");

    let mut config = EngineConfig::default()
        .with_multi_sample(cfg.multi_sample)
        .with_random_sample(cfg.random_sample);
    if cfg.model_path.is_none() {
        config = config.with_image_size(CROP);
    }
    let cpu = Network::from_bytes_with_config(&bytes, CpuBackend, config.clone())?;
    print!("{}", cpu.describe());
    println!();

    let image = synthetic_image(cpu.prepare().rescaled_size() + 8)?;
    classify(&cpu, &image, cfg.top)?;

    let accel = Network::from_bytes_with_config(&bytes, AccelBackend::default(), config)?;
    classify(&accel, &image, cfg.top)?;
    classify(&accel, &image, cfg.top)?;
    let stats = accel.backend().cache_stats();
    println!(
        "texture cache: {} hits, {} misses, {} resident",
        stats.hits, stats.misses, stats.cached_textures
    );

    if let Some(path) = &cfg.save_path {
        let out = match cfg.bits {
            Some(bits) => cpu.to_bytes_with_bits(bits)?,
            None => cpu.to_bytes()?,
        };
        std::fs::write(path, &out).map_err(|e| Error::msg(format!("{path}: {e}")))?;
        info!(path = path.as_str(), bytes = out.len(), "graph saved");
    }
    Ok(())
}
