// Layer — the closed set of layer kinds a graph file can name
//
// The `class` string of a layer tag is matched exactly once, when the tag is
// loaded, and selects one of the variants below. Everything after that is
// static dispatch through `Module`.
//
//   class       variant        role
//   ---------   ------------   ------------------------------------------
//   conv        Conv           convolution lowered onto GEMM
//   gconv       GroupedConv    per-group sub-layers over channel ranges
//   neuron      Neuron         fully connected
//   pool        Pool           max / average pooling
//   normalize   Normalize      local response normalization
//   relu        Relu           max(x, 0)
//   dropout     Dropout        identity
//   flat        Flat           flatten to (batch, features)
//   max         Softmax        row-wise softmax

use deepbelief_core::{Backend, Buffer, Error, Result, Tag};

use crate::activation::{Relu, Softmax};
use crate::conv::{Conv, GroupedConv};
use crate::dropout::Dropout;
use crate::flatten::Flat;
use crate::module::Module;
use crate::neuron::Neuron;
use crate::normalize::Normalize;
use crate::pool::Pool;

#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv),
    GroupedConv(GroupedConv),
    Neuron(Neuron),
    Pool(Pool),
    Normalize(Normalize),
    Relu(Relu),
    Dropout(Dropout),
    Flat(Flat),
    Softmax(Softmax),
}

/// The `class` / `name` entries every layer tag starts with.
pub(crate) fn header(class: &str, name: &str) -> Vec<(&'static str, Tag<'static>)> {
    vec![("class", Tag::string(class)), ("name", Tag::string(name))]
}

/// Leading (batch) dimension of `input`; an empty batch is a shape error.
pub(crate) fn batch_size(input: &Buffer) -> Result<usize> {
    match input.dims().size(0)? {
        0 => Err(Error::msg(format!("empty batch {}", input.dims()))),
        count => Ok(count),
    }
}

/// Bit depth a weight buffer is written at: the requested one, or the depth
/// it is stored at.
pub(crate) fn tensor_bits(buffer: &Buffer, requested: Option<u32>) -> Result<u32> {
    match requested {
        Some(bits) => Ok(bits),
        None => Ok(buffer.precision()?.bits()),
    }
}

impl Layer {
    /// Build a layer from its tag, selected by the `class` entry.
    pub fn from_tag(tag: &Tag<'_>) -> Result<Layer> {
        let class = tag.require_str("class")?;
        let layer = match class {
            "conv" => Layer::Conv(Conv::from_tag(tag)?),
            "gconv" => Layer::GroupedConv(GroupedConv::from_tag(tag)?),
            "neuron" => Layer::Neuron(Neuron::from_tag(tag)?),
            "pool" => Layer::Pool(Pool::from_tag(tag)?),
            "normalize" => Layer::Normalize(Normalize::from_tag(tag)?),
            "relu" => Layer::Relu(Relu::from_tag(tag)?),
            "dropout" => Layer::Dropout(Dropout::from_tag(tag)?),
            "flat" => Layer::Flat(Flat::from_tag(tag)?),
            "max" => Layer::Softmax(Softmax::from_tag(tag)?),
            other => {
                return Err(Error::UnknownLayerClass {
                    class: other.to_string(),
                })
            }
        };
        Ok(layer)
    }

    /// Serialize back to a layer tag. `weight_bits` requantizes weight
    /// matrices; `None` keeps each at the depth it is stored at.
    pub fn to_tag(&self, weight_bits: Option<u32>) -> Result<Tag<'static>> {
        match self {
            Layer::Conv(l) => l.to_tag(weight_bits),
            Layer::GroupedConv(l) => l.to_tag(weight_bits),
            Layer::Neuron(l) => l.to_tag(weight_bits),
            Layer::Pool(l) => Ok(l.to_tag()),
            Layer::Normalize(l) => Ok(l.to_tag()),
            Layer::Relu(l) => Ok(l.to_tag()),
            Layer::Dropout(l) => Ok(l.to_tag()),
            Layer::Flat(l) => Ok(l.to_tag()),
            Layer::Softmax(l) => Ok(l.to_tag()),
        }
    }

    /// The class string this layer is stored under.
    pub fn class(&self) -> &'static str {
        match self {
            Layer::Conv(_) => "conv",
            Layer::GroupedConv(_) => "gconv",
            Layer::Neuron(_) => "neuron",
            Layer::Pool(_) => "pool",
            Layer::Normalize(_) => "normalize",
            Layer::Relu(_) => "relu",
            Layer::Dropout(_) => "dropout",
            Layer::Flat(_) => "flat",
            Layer::Softmax(_) => "max",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layer::Conv(l) => l.name(),
            Layer::GroupedConv(l) => l.name(),
            Layer::Neuron(l) => l.name(),
            Layer::Pool(l) => l.name(),
            Layer::Normalize(l) => l.name(),
            Layer::Relu(l) => l.name(),
            Layer::Dropout(l) => l.name(),
            Layer::Flat(l) => l.name(),
            Layer::Softmax(l) => l.name(),
        }
    }

    pub fn is_relu(&self) -> bool {
        matches!(self, Layer::Relu(_))
    }

    /// One line naming the layer and its parameters.
    pub fn describe(&self) -> String {
        let params = match self {
            Layer::Conv(l) => l.describe(),
            Layer::GroupedConv(l) => l.describe(),
            Layer::Neuron(l) => l.describe(),
            Layer::Pool(l) => l.describe(),
            Layer::Normalize(l) => l.describe(),
            _ => String::new(),
        };
        if params.is_empty() {
            format!("{} '{}'", self.class(), self.name())
        } else {
            format!("{} '{}': {}", self.class(), self.name(), params)
        }
    }
}

impl<B: Backend + ?Sized> Module<B> for Layer {
    fn forward(&self, backend: &B, input: &Buffer) -> Result<Buffer> {
        match self {
            Layer::Conv(l) => l.forward(backend, input),
            Layer::GroupedConv(l) => l.forward(backend, input),
            Layer::Neuron(l) => l.forward(backend, input),
            Layer::Pool(l) => l.forward(backend, input),
            Layer::Normalize(l) => l.forward(backend, input),
            Layer::Relu(l) => l.forward(backend, input),
            Layer::Dropout(l) => l.forward(backend, input),
            Layer::Flat(l) => l.forward(backend, input),
            Layer::Softmax(l) => l.forward(backend, input),
        }
    }

    fn weights(&self) -> Vec<&Buffer> {
        match self {
            Layer::Conv(l) => Module::<B>::weights(l),
            Layer::GroupedConv(l) => Module::<B>::weights(l),
            Layer::Neuron(l) => Module::<B>::weights(l),
            _ => Vec::new(),
        }
    }
}
