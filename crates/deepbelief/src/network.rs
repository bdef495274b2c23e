// Network — a loaded graph bound to a backend
//
// A graph file is one root DICT:
//
//   data_mean     tensor   mean image subtracted from every input
//   layers        LIST     layer DICTs, in execution order
//   label_names   LIST     CHAR per output class
//   copyright     CHAR     (optional)
//   input_size    UINT     (optional) edge images are rescaled to before
//                            cropping, overrides the config
//   source        CHAR     (optional) where the weights came from
//
// Loading either yields a complete network or an error; nothing is built
// halfway. Once loaded the network never changes, so `run` takes `&self`.

use std::time::Instant;

use deepbelief_core::format::{buffer_from_tag, buffer_to_tag, decode_root};
use deepbelief_core::{Backend, Buffer, Error, Result, Tag, TagType};
use deepbelief_nn::{Layer, Module, Sequential};
use rand::Rng;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::prepare::PrepareInput;

/// Score of one output class.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

/// The `count` highest scoring predictions, best first.
pub fn top_predictions(predictions: &[Prediction], count: usize) -> Vec<Prediction> {
    let mut sorted = predictions.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted.truncate(count);
    sorted
}

pub struct Network<B: Backend> {
    backend: B,
    layers: Sequential,
    data_mean: Buffer,
    labels: Vec<String>,
    copyright: Option<String>,
    source: Option<String>,
    input_size: Option<usize>,
    config: EngineConfig,
    prepare: PrepareInput,
}

impl<B: Backend> Network<B> {
    /// Load a graph with the default engine configuration.
    pub fn from_bytes(bytes: &[u8], backend: B) -> Result<Self> {
        Self::from_bytes_with_config(bytes, backend, EngineConfig::default())
    }

    pub fn from_bytes_with_config(bytes: &[u8], backend: B, config: EngineConfig) -> Result<Self> {
        let started = Instant::now();
        let root = decode_root(bytes)?;
        let network = Self::from_tag(&root, backend, config)?;
        info!(
            backend = network.backend.name(),
            layers = network.layers.len(),
            labels = network.labels.len(),
            copyright = network.copyright.as_deref().unwrap_or(""),
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "network loaded"
        );
        Ok(network)
    }

    /// Build from an already decoded root tag.
    pub fn from_tag(root: &Tag<'_>, backend: B, mut config: EngineConfig) -> Result<Self> {
        let data_mean = buffer_from_tag(root.require("data_mean")?)?.with_name("data_mean");
        let layers = Sequential::from_tags(root.require_list("layers")?)?;
        let labels = root
            .require_list("label_names")?
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or(Error::WrongTagType {
                    key: "label_names".to_string(),
                    expected: TagType::Char.name(),
                    got: item.tag_type().name(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let copyright = root.optional_str("copyright")?.map(str::to_string);
        let source = root.optional_str("source")?.map(str::to_string);
        let input_size = root.optional_u32("input_size")?.map(|v| v as usize);
        if let Some(size) = input_size {
            config.rescaled_size = size;
        }
        let prepare = PrepareInput::new(&data_mean, &config)?;

        Ok(Network {
            backend,
            layers,
            data_mean,
            labels,
            copyright,
            source,
            input_size,
            config,
            prepare,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layers(&self) -> &[Layer] {
        self.layers.layers()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn data_mean(&self) -> &Buffer {
        &self.data_mean
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn prepare(&self) -> &PrepareInput {
        &self.prepare
    }

    /// Total number of stored weight values.
    pub fn num_parameters(&self) -> usize {
        Module::<B>::num_parameters(&self.layers)
    }

    /// Run every layer over `input`.
    pub fn run(&self, input: &Buffer) -> Result<Buffer> {
        self.layers.forward(&self.backend, input)
    }

    /// Run only the first `count` layers.
    pub fn run_partial(&self, input: &Buffer, count: usize) -> Result<Buffer> {
        self.layers.forward_partial(&self.backend, input, count)
    }

    /// Score every label for an (H, W, C) image.
    ///
    /// The image is prepared into one or ten crops; the scores of all crops
    /// are averaged.
    pub fn classify(&self, image: &Buffer) -> Result<Vec<Prediction>> {
        self.classify_with_rng(image, &mut rand::thread_rng())
    }

    /// Like [`classify`](Self::classify), with random crops drawn from `rng`.
    pub fn classify_with_rng<R: Rng + ?Sized>(
        &self,
        image: &Buffer,
        rng: &mut R,
    ) -> Result<Vec<Prediction>> {
        let started = Instant::now();
        let input = self.prepare.run_with_rng(image, rng)?;
        let output = self.run(&input)?;
        let (samples, classes) = output.dims().as_matrix()?;
        if classes != self.labels.len() {
            return Err(Error::ShapeMismatch {
                expected: (samples, self.labels.len()).into(),
                got: output.dims().clone(),
            });
        }
        let scores = output.to_f32_vec()?;
        let predictions = self
            .labels
            .iter()
            .enumerate()
            .map(|(class, label)| {
                let total: f32 = (0..samples).map(|s| scores[s * classes + class]).sum();
                Prediction {
                    label: label.clone(),
                    score: total / samples as f32,
                }
            })
            .collect();
        debug!(
            samples,
            classes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classified"
        );
        Ok(predictions)
    }

    /// The root tag of this graph. `weight_bits` requantizes every weight
    /// matrix; `None` keeps each at the depth it was loaded at.
    pub fn to_tag(&self, weight_bits: Option<u32>) -> Result<Tag<'static>> {
        let layers = self
            .layers
            .layers()
            .iter()
            .map(|l| l.to_tag(weight_bits))
            .collect::<Result<Vec<_>>>()?;
        let labels = self.labels.iter().map(Tag::string).collect();
        let mut entries = vec![
            ("data_mean", buffer_to_tag(&self.data_mean, 32)?),
            ("layers", Tag::List(layers)),
            ("label_names", Tag::List(labels)),
        ];
        if let Some(size) = self.input_size {
            entries.push(("input_size", Tag::Uint(size as u32)));
        }
        if let Some(source) = &self.source {
            entries.push(("source", Tag::string(source)));
        }
        entries.push((
            "copyright",
            Tag::string(self.copyright.as_deref().unwrap_or_default()),
        ));
        Ok(Tag::dict(entries))
    }

    /// Serialize the graph, weights at their loaded depths.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_tag(None)?.encode())
    }

    /// Serialize the graph with every weight matrix stored at `bits`.
    pub fn to_bytes_with_bits(&self, bits: u32) -> Result<Vec<u8>> {
        Ok(self.to_tag(Some(bits))?.encode())
    }

    /// One line per layer with its parameters.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "Network with {} layers, {} labels, {} parameters\n",
            self.layers.len(),
            self.labels.len(),
            self.num_parameters()
        );
        for (index, layer) in self.layers.layers().iter().enumerate() {
            text.push_str(&format!("{index:3}: {}\n", layer.describe()));
        }
        text
    }
}

impl<B: Backend> std::fmt::Debug for Network<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("backend", &self.backend)
            .field("layers", &self.layers.len())
            .field("labels", &self.labels.len())
            .field("config", &self.config)
            .finish()
    }
}
