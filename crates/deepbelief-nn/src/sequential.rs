// Sequential — the kept layers of a graph, applied one after another
//
// The output of each layer becomes the input to the next. Layers are never
// skipped or reordered at run time; the only filtering happens while the
// list is built: a relu whose previous kept layer is also a relu adds
// nothing, so it is dropped at load.
//
//   let layers = Sequential::from_tags(graph.require_list("layers")?)?;
//   let output = layers.forward(&backend, &input)?;

use std::time::Instant;

use deepbelief_core::{Backend, Buffer, Result, Tag};
use tracing::{debug, warn};

use crate::layer::Layer;
use crate::module::Module;

#[derive(Debug, Clone, Default)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Build from a list of layer tags, in order.
    pub fn from_tags(tags: &[Tag<'_>]) -> Result<Self> {
        let mut sequential = Sequential::new();
        for tag in tags {
            sequential.push(Layer::from_tag(tag)?);
        }
        Ok(sequential)
    }

    /// Append a layer. Returns whether it was kept.
    pub fn push(&mut self, layer: Layer) -> bool {
        if layer.is_relu() && self.layers.last().is_some_and(Layer::is_relu) {
            warn!(name = layer.name(), "dropping relu that follows another relu");
            return false;
        }
        self.layers.push(layer);
        true
    }

    /// Append a layer. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, layer: Layer) -> Self {
        self.push(layer);
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run the first `count` layers (all of them if `count` is larger).
    pub fn forward_partial<B: Backend + ?Sized>(
        &self,
        backend: &B,
        input: &Buffer,
        count: usize,
    ) -> Result<Buffer> {
        let mut current = input.view();
        for (index, layer) in self.layers.iter().take(count).enumerate() {
            let started = Instant::now();
            current = layer.forward(backend, &current)?;
            debug!(
                index,
                class = layer.class(),
                name = layer.name(),
                dims = %current.dims(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "layer done"
            );
        }
        Ok(current)
    }
}

impl<B: Backend + ?Sized> Module<B> for Sequential {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        self.forward_partial(backend, input, self.layers.len())
    }

    fn weights(&self) -> Vec<&Buffer> {
        self.layers
            .iter()
            .flat_map(|l| Module::<B>::weights(l))
            .collect()
    }
}
